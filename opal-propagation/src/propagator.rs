//! The fixpoint driver.
//!
//! The propagator owns every cache of the analysis: the template arenas,
//! the type-variable arena, the per-global/per-field/per-outer variables,
//! the site table, and the queue of dirty method templates. All mutation
//! funnels through it; the abstract interpreter only ever holds the
//! scope it is currently working on.

use std::collections::HashMap;

use log::{debug, info, trace};

use opal_program::{Method, Program};

use crate::concrete_type::ConcreteType;
use crate::database::TypeDatabase;
use crate::interpreter;
use crate::templates::{
    BlockTemplate, BlockTemplateId, MethodTemplate, MethodTemplateId, TypeVariableId,
};
use crate::type_scope::TypeScope;
use crate::type_set::TypeSet;
use crate::type_stack::TypeStack;
use crate::type_variable::TypeVariable;
use crate::worklist::Worklist;

/// Knobs of the analysis.
#[derive(Debug, Clone)]
pub struct PropagatorConfig {
    /// Argument positions whose type set outgrows this many classes are
    /// widened to ANY instead of specializing per class.
    pub megamorphic_threshold: usize,
}

impl PropagatorConfig {
    pub const DEFAULT_MEGAMORPHIC_THRESHOLD: usize = 5;
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        PropagatorConfig {
            megamorphic_threshold: Self::DEFAULT_MEGAMORPHIC_THRESHOLD,
        }
    }
}

pub struct Propagator<'a> {
    program: &'a Program,
    config: PropagatorConfig,
    words_per_type: usize,

    variables: Vec<TypeVariable>,
    templates: Vec<MethodTemplate>,
    blocks: Vec<BlockTemplate>,

    /// Specializations per method header, searched linearly per bucket.
    template_index: HashMap<u32, Vec<MethodTemplateId>>,
    globals: HashMap<u32, TypeVariableId>,
    fields: HashMap<(u32, u32), TypeVariableId>,
    /// Reporting-only variables for outer-local accesses.
    outers: HashMap<u32, TypeVariableId>,
    /// Variables observed per bytecode site; their union is the site's
    /// reported type.
    sites: HashMap<u32, Vec<TypeVariableId>>,

    enqueued: Vec<MethodTemplateId>,
}

impl<'a> Propagator<'a> {
    pub fn new(program: &'a Program) -> Propagator<'a> {
        Self::with_config(program, PropagatorConfig::default())
    }

    pub fn with_config(program: &'a Program, config: PropagatorConfig) -> Propagator<'a> {
        Propagator {
            program,
            config,
            words_per_type: TypeSet::words_per_type(program.class_count),
            variables: Vec::new(),
            templates: Vec::new(),
            blocks: Vec::new(),
            template_index: HashMap::new(),
            globals: HashMap::new(),
            fields: HashMap::new(),
            outers: HashMap::new(),
            sites: HashMap::new(),
            enqueued: Vec::new(),
        }
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    pub fn words_per_type(&self) -> usize {
        self.words_per_type
    }

    pub(crate) fn template(&self, id: MethodTemplateId) -> &MethodTemplate {
        &self.templates[id.index()]
    }

    pub(crate) fn block(&self, id: BlockTemplateId) -> &BlockTemplate {
        &self.blocks[id.index()]
    }

    fn new_variable(&mut self) -> TypeVariableId {
        let id = TypeVariableId(self.variables.len() as u32);
        self.variables.push(TypeVariable::new(self.words_per_type));
        id
    }

    pub(crate) fn variable_type(&self, id: TypeVariableId) -> &TypeSet {
        self.variables[id.index()].type_set()
    }

    /// Read a variable, subscribing `user` to widenings and recording
    /// `site` in the reporting table.
    pub(crate) fn use_variable(
        &mut self,
        id: TypeVariableId,
        user: Option<MethodTemplateId>,
        site: Option<u32>,
    ) -> TypeSet {
        if let Some(site) = site {
            self.add_site(site, id);
        }
        let variable = &mut self.variables[id.index()];
        if let Some(user) = user {
            variable.add_user(user);
        }
        variable.type_set().clone()
    }

    /// Union `type_set` into a variable; a widening re-enqueues every
    /// subscriber.
    pub(crate) fn merge_variable(&mut self, id: TypeVariableId, type_set: &TypeSet) -> bool {
        if !self.variables[id.index()].merge(type_set) {
            return false;
        }
        let users = self.variables[id.index()].users().to_vec();
        for user in users {
            self.enqueue(user);
        }
        true
    }

    fn add_site(&mut self, site: u32, variable: TypeVariableId) {
        let entry = self.sites.entry(site).or_default();
        if !entry.contains(&variable) {
            entry.push(variable);
        }
    }

    pub(crate) fn global_variable(&mut self, index: u32) -> TypeVariableId {
        if let Some(&variable) = self.globals.get(&index) {
            return variable;
        }
        let variable = self.new_variable();
        self.globals.insert(index, variable);
        variable
    }

    pub(crate) fn field(&mut self, class: u32, index: u32) -> TypeVariableId {
        if let Some(&variable) = self.fields.get(&(class, index)) {
            return variable;
        }
        let variable = self.new_variable();
        self.fields.insert((class, index), variable);
        variable
    }

    fn outer(&mut self, site: u32) -> TypeVariableId {
        if let Some(&variable) = self.outers.get(&site) {
            return variable;
        }
        let variable = self.new_variable();
        self.outers.insert(site, variable);
        self.add_site(site, variable);
        variable
    }

    pub(crate) fn enqueue(&mut self, id: MethodTemplateId) {
        let template = &mut self.templates[id.index()];
        if template.enqueued() {
            return;
        }
        template.mark_enqueued();
        self.enqueued.push(id);
    }

    /// Run the analysis to fixpoint and snapshot the results.
    pub fn propagate(mut self) -> TypeDatabase {
        self.seed();

        let entry = self.program.entry();
        let arguments = vec![ConcreteType::Class(self.program.task_class())];
        let id = self.instantiate(entry, arguments);
        self.template_index
            .entry(entry.header())
            .or_default()
            .push(id);
        self.enqueue(id);

        while let Some(id) = self.enqueued.pop() {
            self.templates[id.index()].clear_enqueued();
            self.propagate_template(id);
        }

        info!(
            "fixpoint reached: {} method templates, {} block templates, {} type variables",
            self.templates.len(),
            self.blocks.len(),
            self.variables.len()
        );
        self.snapshot()
    }

    /// Inject the types the VM itself produces before any bytecode runs.
    fn seed(&mut self) {
        let program = self.program;
        let words = self.words_per_type;

        // Pre-initialized globals carry their literal's class. Lazily
        // initialized ones are skipped: their type is injected by
        // LOAD_GLOBAL_VAR_LAZY from the initializer's return value.
        for (index, value) in program.global_variables.iter().enumerate() {
            if value.is_instance_of(program.lazy_initializer_class()) {
                continue;
            }
            let mut set = TypeSet::empty(words);
            set.add(program.class_of(value));
            let variable = self.global_variable(index as u32);
            self.merge_variable(variable, &set);
        }

        // Tasks are allocated by the VM, so their field types are seeded
        // by hand: smi for the id, nothing for the stack slot (it never
        // escapes to bytecode), null elsewhere.
        let task = program.task_class();
        for index in 0..program.instance_fields_for(task) {
            if index == Program::TASK_STACK_INDEX {
                continue;
            }
            let mut set = TypeSet::empty(words);
            if index == Program::TASK_ID_INDEX {
                set.add_smi(program);
            } else {
                set.add_null(program);
            }
            let variable = self.field(task, index as u32);
            self.merge_variable(variable, &set);
        }

        // Exceptions carry an arbitrary value and an optional trace.
        let exception = program.exception_class();
        assert_eq!(program.instance_fields_for(exception), 2);
        let mut value = TypeSet::empty(words);
        value.add_any(program);
        let variable = self.field(exception, Program::EXCEPTION_VALUE_INDEX as u32);
        self.merge_variable(variable, &value);
        let mut trace = TypeSet::empty(words);
        trace.add_byte_array(program, true);
        let variable = self.field(exception, Program::EXCEPTION_TRACE_INDEX as u32);
        self.merge_variable(variable, &trace);
    }

    /// Find or create the specialization of `target` for an argument
    /// tuple. Lookup compares tuples exactly — block identity included —
    /// so block arguments always force distinct specializations.
    fn find(&mut self, target: Method, arguments: &[ConcreteType]) -> MethodTemplateId {
        if let Some(bucket) = self.template_index.get(&target.header()) {
            for &id in bucket {
                if self.templates[id.index()].matches(target, arguments) {
                    return id;
                }
            }
        }
        let id = self.instantiate(target, arguments.to_vec());
        self.template_index
            .entry(target.header())
            .or_default()
            .push(id);
        self.propagate_template(id);
        id
    }

    fn instantiate(&mut self, method: Method, arguments: Vec<ConcreteType>) -> MethodTemplateId {
        debug!(
            "instantiating method {} for {:?}",
            method.header(),
            arguments
        );
        let result = self.new_variable();
        let id = MethodTemplateId(self.templates.len() as u32);
        self.templates
            .push(MethodTemplate::new(method, arguments, result));
        id
    }

    fn propagate_template(&mut self, id: MethodTemplateId) {
        let template = &self.templates[id.index()];
        let method = template.method();
        let arguments = template.arguments().to_vec();
        trace!("propagating method {} ({:?})", method.header(), arguments);

        let scope = TypeScope::for_method(self.program, method, &arguments, self.words_per_type);
        let mut worklist = Worklist::new(method.entry(), scope);
        while let Some((position, mut scope)) = worklist.next() {
            interpreter::process(self, id, position, &mut scope, &mut worklist, None);
        }
    }

    /// Propagate a block body in an extension of the enclosing scope.
    /// `context` is the surrounding method template; returns out of the
    /// block merge back into `outer`.
    pub(crate) fn propagate_block(
        &mut self,
        id: BlockTemplateId,
        context: MethodTemplateId,
        outer: &mut TypeScope,
        linked: bool,
    ) {
        let block = &self.blocks[id.index()];
        let method = block.method();
        let argument_types: Vec<TypeSet> = (1..block.arity())
            .map(|i| self.variables[block.argument(i).index()].type_set().clone())
            .collect();

        let scope = TypeScope::for_block(
            id,
            method,
            &argument_types,
            outer,
            linked,
            self.words_per_type,
        );
        let mut worklist = Worklist::new(method.entry(), scope);
        while let Some((position, mut scope)) = worklist.next() {
            interpreter::process(
                self,
                context,
                position,
                &mut scope,
                &mut worklist,
                Some(&mut *outer),
            );
        }
    }

    /// Find or create the block template for a creation site inside
    /// `context`. Created lazily and exactly once per (template, site);
    /// the parameter cells subscribe the surrounding template.
    pub(crate) fn find_block(
        &mut self,
        context: MethodTemplateId,
        method: Method,
        level: usize,
        site: u32,
    ) -> BlockTemplateId {
        if let Some(existing) = self.templates[context.index()].block_at(site) {
            return existing;
        }
        let arguments: Vec<TypeVariableId> =
            (0..method.arity()).map(|_| self.new_variable()).collect();
        let result = self.new_variable();
        let id = BlockTemplateId(self.blocks.len() as u32);
        self.blocks
            .push(BlockTemplate::new(method, level, arguments.clone(), result));
        for &argument in arguments.iter().skip(1) {
            self.variables[argument.index()].add_user(context);
        }
        self.templates[context.index()].insert_block(site, id);
        debug!("created block template at site {site} (level {level})");
        id
    }

    /// The heart of the Cartesian Product Algorithm: walk the argument
    /// slots left to right, branching per class id, keeping blocks by
    /// identity, and collapsing megamorphic positions to ANY.
    fn call_method(
        &mut self,
        caller: MethodTemplateId,
        stack: &mut TypeStack,
        site: u32,
        target: Method,
        arguments: &mut Vec<ConcreteType>,
    ) {
        let arity = target.arity();
        let index = arguments.len();
        if index == arity {
            let callee = self.find(target, arguments);
            let result = self.template(callee).result();
            let value = self.use_variable(result, Some(caller), Some(site));
            stack.merge_top(&value);
            return;
        }

        let next = stack.local(arity - index).clone();
        if next.is_block() {
            arguments.push(ConcreteType::Block(next.block()));
            self.call_method(caller, stack, site, target, arguments);
            arguments.pop();
        } else if next.size() > self.config.megamorphic_threshold {
            // Analyzing the target once with ANY caps the explosion at
            // the cost of mixing types.
            arguments.push(ConcreteType::Any);
            self.call_method(caller, stack, site, target, arguments);
            arguments.pop();
        } else {
            for class in next.iter() {
                arguments.push(ConcreteType::Class(class));
                self.call_method(caller, stack, site, target, arguments);
                arguments.pop();
            }
        }
    }

    pub(crate) fn call_static(
        &mut self,
        caller: MethodTemplateId,
        stack: &mut TypeStack,
        site: u32,
        target: Method,
    ) {
        let mut arguments = Vec::new();
        stack.push_empty();
        self.call_method(caller, stack, site, target, &mut arguments);
        stack.drop_arguments(target.arity());
    }

    pub(crate) fn call_virtual(
        &mut self,
        caller: MethodTemplateId,
        stack: &mut TypeStack,
        site: u32,
        arity: usize,
        offset: u32,
    ) {
        let receiver = stack.local(arity - 1).clone();
        stack.push_empty();
        for class in receiver.iter() {
            let Some(target) = self.program.dispatch_target((class + offset) as usize) else {
                continue;
            };
            if target.selector_offset() != Some(offset as u16) {
                continue;
            }
            let mut arguments = vec![ConcreteType::Class(class)];
            self.call_method(caller, stack, site, target, &mut arguments);
        }
        stack.drop_arguments(arity);
    }

    pub(crate) fn load_field(
        &mut self,
        user: MethodTemplateId,
        stack: &mut TypeStack,
        site: u32,
        index: u32,
    ) {
        let instance = stack.local(0).clone();
        stack.push_empty();
        for class in instance.iter() {
            let variable = self.field(class, index);
            let value = self.use_variable(variable, Some(user), Some(site));
            stack.merge_top(&value);
        }
        stack.drop_arguments(1);
    }

    pub(crate) fn store_field(&mut self, stack: &mut TypeStack, index: u32) {
        let value = stack.local(0).clone();
        let instance = stack.local(1).clone();
        for class in instance.iter() {
            let variable = self.field(class, index);
            self.merge_variable(variable, &value);
        }
        stack.drop_arguments(1);
    }

    /// Read a local through a block reference. The observed value types
    /// are tracked per access site, for reporting only.
    pub(crate) fn load_outer(&mut self, scope: &mut TypeScope, site: u32, index: usize) {
        let block = scope.top().local(0).clone();
        let level = self.block(block.block()).level();
        let value = scope.load_outer(level, index);
        let stack = scope.top_mut();
        stack.pop();
        stack.push(&value);
        if value.is_block() {
            return;
        }
        let variable = self.outer(site);
        self.merge_variable(variable, &value);
    }

    /// Snapshot every reported site and specialization into a database.
    fn snapshot(&self) -> TypeDatabase {
        let mut database = TypeDatabase::new();

        for (&site, variables) in &self.sites {
            let mut union = TypeSet::empty(self.words_per_type);
            for &variable in variables {
                union.add_all(self.variable_type(variable));
            }
            database.add_usage(site, union);
        }

        for (&header, bucket) in &self.template_index {
            let arity = self.template(bucket[0]).arity();
            let mut columns = Vec::with_capacity(arity);
            for n in 0..arity {
                let mut union = TypeSet::empty(self.words_per_type);
                for &id in bucket {
                    match self.template(id).argument(n) {
                        ConcreteType::Class(class) => union.add(class),
                        ConcreteType::Any => {
                            union.add_any(self.program);
                            break;
                        }
                        ConcreteType::Block(_) => break,
                    }
                }
                columns.push(union);
            }
            database.add_method_arguments(header, columns);
        }

        let mut grouped: HashMap<u32, Vec<BlockTemplateId>> = HashMap::new();
        for template in &self.templates {
            for (site, block) in template.blocks() {
                grouped.entry(site).or_default().push(block);
            }
        }
        for bucket in grouped.values() {
            let first = self.block(bucket[0]);
            let position = first.method().header();
            let arity = first.arity();
            let mut columns = Vec::with_capacity(arity.saturating_sub(1));
            for n in 1..arity {
                let mut union = TypeSet::empty(self.words_per_type);
                for &id in bucket {
                    union.add_all(self.variable_type(self.block(id).argument(n)));
                }
                columns.push(union);
            }
            database.add_block_arguments(position, columns);
        }

        database
    }
}
