//! Method and block specializations.
//!
//! Templates are immortal for the duration of an analysis and live in
//! `Vec` arenas on the propagator. All cross-references — a variable's
//! subscribers, a template's result, a block's argument cells — are plain
//! index newtypes, so the subscriber/user back-edges never form ownership
//! cycles.

use std::collections::HashMap;

use opal_program::Method;

use crate::concrete_type::ConcreteType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodTemplateId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockTemplateId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeVariableId(pub(crate) u32);

impl MethodTemplateId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockTemplateId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl TypeVariableId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One specialization of a method for a frozen tuple of argument types.
#[derive(Debug)]
pub struct MethodTemplate {
    method: Method,
    arguments: Vec<ConcreteType>,
    result: TypeVariableId,
    enqueued: bool,
    /// Blocks created inside this specialization, keyed by creation site.
    blocks: HashMap<u32, BlockTemplateId>,
}

impl MethodTemplate {
    pub fn new(method: Method, arguments: Vec<ConcreteType>, result: TypeVariableId) -> Self {
        MethodTemplate {
            method,
            arguments,
            result,
            enqueued: false,
            blocks: HashMap::new(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    pub fn argument(&self, index: usize) -> ConcreteType {
        self.arguments[index]
    }

    pub fn arguments(&self) -> &[ConcreteType] {
        &self.arguments
    }

    pub fn result(&self) -> TypeVariableId {
        self.result
    }

    pub fn matches(&self, target: Method, arguments: &[ConcreteType]) -> bool {
        self.method.header() == target.header()
            && ConcreteType::tuples_match(&self.arguments, arguments, false)
    }

    pub fn enqueued(&self) -> bool {
        self.enqueued
    }

    pub fn mark_enqueued(&mut self) {
        self.enqueued = true;
    }

    pub fn clear_enqueued(&mut self) {
        self.enqueued = false;
    }

    pub fn block_at(&self, site: u32) -> Option<BlockTemplateId> {
        self.blocks.get(&site).copied()
    }

    pub fn insert_block(&mut self, site: u32, block: BlockTemplateId) {
        let previous = self.blocks.insert(site, block);
        debug_assert!(previous.is_none(), "block created twice at site {site}");
    }

    pub fn blocks(&self) -> impl Iterator<Item = (u32, BlockTemplateId)> + '_ {
        self.blocks.iter().map(|(&site, &block)| (site, block))
    }
}

/// One block body, specialized per creation site within a surrounding
/// method template.
#[derive(Debug)]
pub struct BlockTemplate {
    method: Method,
    /// Scope level of the frame that created the block; outer accesses
    /// through this block resolve against that level.
    level: usize,
    /// One cell per parameter. Index 0 is the receiver slot, which holds
    /// the block itself and whose cell stays unused.
    arguments: Vec<TypeVariableId>,
    result: TypeVariableId,
}

impl BlockTemplate {
    pub fn new(
        method: Method,
        level: usize,
        arguments: Vec<TypeVariableId>,
        result: TypeVariableId,
    ) -> Self {
        debug_assert_eq!(method.arity(), arguments.len());
        BlockTemplate {
            method,
            level,
            arguments,
            result,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    pub fn argument(&self, index: usize) -> TypeVariableId {
        self.arguments[index]
    }

    pub fn result(&self) -> TypeVariableId {
        self.result
    }
}
