//! Stacks-of-stacks: the active frame plus the outer frames a block can
//! reach.

use std::rc::Rc;

use opal_program::{Method, Program};

use crate::concrete_type::ConcreteType;
use crate::templates::BlockTemplateId;
use crate::type_set::TypeSet;
use crate::type_stack::TypeStack;

/// How two scopes are merged. The distinction is what makes non-local
/// returns and unwinding correct without tracking individual throw sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Join at a branch target: all levels up to the destination's depth.
    Local,
    /// A method or block return: only the method frame survives; nested
    /// block frames of the source are discarded.
    Return,
    /// Unwinding out of a try: frames at or below the innermost linked
    /// level.
    Unwind,
}

/// The abstract machine state at one bytecode position.
///
/// Level 0 is the method frame; each nested block pushes one more level.
/// Levels are shared copy-on-write: `copy_lazily` only bumps refcounts
/// and the first write to a level clones it, so branch-local scopes share
/// unchanged outer frames cheaply.
#[derive(Debug, Clone)]
pub struct TypeScope {
    levels: Vec<Rc<TypeStack>>,
    /// Innermost level currently wrapped in a try-block, -1 when none.
    /// Unwinding can stop at this level but never below a linked frame's
    /// caller, so UNWIND merges need not look deeper.
    level_linked: isize,
}

impl TypeScope {
    /// Fresh scope for one method specialization: a single frame with the
    /// argument slots seeded from the frozen argument tuple.
    pub fn for_method(
        program: &Program,
        method: Method,
        arguments: &[ConcreteType],
        words_per_type: usize,
    ) -> TypeScope {
        let sp = method.arity() + Method::FRAME_SIZE;
        let mut stack = TypeStack::new(sp, sp + method.max_height() + 1, words_per_type);
        for (index, argument) in arguments.iter().enumerate() {
            let slot = stack.get_mut(index);
            match argument {
                ConcreteType::Class(id) => slot.add(*id),
                ConcreteType::Block(block) => slot.set_block(*block),
                ConcreteType::Any => slot.add_any(program),
            }
        }
        TypeScope {
            levels: vec![Rc::new(stack)],
            level_linked: -1,
        }
    }

    /// Extend `outer` with a fresh frame for a block body. The receiver
    /// slot records the block itself; the remaining parameter slots are
    /// seeded from the block's argument cells.
    pub fn for_block(
        block: BlockTemplateId,
        method: Method,
        argument_types: &[TypeSet],
        outer: &TypeScope,
        linked: bool,
        words_per_type: usize,
    ) -> TypeScope {
        debug_assert_eq!(argument_types.len() + 1, method.arity());
        let mut levels: Vec<Rc<TypeStack>> = outer
            .levels
            .iter()
            .map(|level| Rc::new(level.as_ref().clone()))
            .collect();

        let sp = method.arity() + Method::FRAME_SIZE;
        let mut stack = TypeStack::new(sp, sp + method.max_height() + 1, words_per_type);
        stack.get_mut(0).set_block(block);
        for (index, argument) in argument_types.iter().enumerate() {
            stack.set(index + 1, argument);
        }
        levels.push(Rc::new(stack));

        let level = levels.len() - 1;
        TypeScope {
            levels,
            level_linked: if linked {
                level as isize
            } else {
                outer.level_linked
            },
        }
    }

    /// Depth of the innermost frame; 0 for a plain method scope.
    pub fn level(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn is_linked(&self) -> bool {
        self.level_linked >= 0
    }

    pub fn level_linked(&self) -> isize {
        self.level_linked
    }

    pub fn top(&self) -> &TypeStack {
        self.levels[self.level()].as_ref()
    }

    pub fn top_mut(&mut self) -> &mut TypeStack {
        let level = self.level();
        self.at_mut(level)
    }

    pub fn at(&self, level: usize) -> &TypeStack {
        self.levels[level].as_ref()
    }

    /// Mutable access to a level, promoting a shared level to an owned
    /// copy on first write.
    pub fn at_mut(&mut self, level: usize) -> &mut TypeStack {
        Rc::make_mut(&mut self.levels[level])
    }

    /// Read a local from the frame that created `block`.
    pub fn load_outer(&self, block_level: usize, index: usize) -> TypeSet {
        self.at(block_level).local(index).clone()
    }

    pub fn store_outer(&mut self, block_level: usize, index: usize, value: &TypeSet) {
        self.at_mut(block_level).set_local(index, value);
    }

    /// Deep copy: every level gets its own stack.
    pub fn copy(&self) -> TypeScope {
        TypeScope {
            levels: self
                .levels
                .iter()
                .map(|level| Rc::new(level.as_ref().clone()))
                .collect(),
            level_linked: self.level_linked,
        }
    }

    /// Cheap copy sharing every level until first write.
    pub fn copy_lazily(&self) -> TypeScope {
        TypeScope {
            levels: self.levels.clone(),
            level_linked: self.level_linked,
        }
    }

    /// Merge `other` into this scope. Returns true iff anything widened.
    pub fn merge(&mut self, other: &TypeScope, kind: MergeKind) -> bool {
        let target = match kind {
            MergeKind::Local => {
                debug_assert!(self.level() <= other.level());
                self.level() as isize
            }
            MergeKind::Return => 0,
            MergeKind::Unwind => other.level_linked,
        };
        let target = target.min(self.level() as isize);
        let mut result = false;
        let mut level = 0;
        while (level as isize) <= target {
            result = self.at_mut(level).merge(other.at(level)) || result;
            level += 1;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_program::{ImageBuilder, MethodAsm, Opcode};

    fn scope_fixture() -> (Program, Method) {
        let mut builder = ImageBuilder::new();
        let mut main = MethodAsm::new(2, 4);
        main.op(Opcode::ReturnNull);
        let main = builder.add_method(main);
        builder.entry(main);
        let program = builder.finish().expect("image should validate");
        let method = program.entry();
        (program, method)
    }

    fn words(program: &Program) -> usize {
        TypeSet::words_per_type(program.class_count)
    }

    #[test]
    fn test_method_scope_seeds_arguments() {
        let (program, method) = scope_fixture();
        let arguments = [ConcreteType::Class(3), ConcreteType::Any];
        let scope = TypeScope::for_method(&program, method, &arguments, words(&program));

        assert_eq!(scope.level(), 0);
        assert!(!scope.is_linked());
        assert!(scope.top().get(0).contains(3));
        assert!(scope.top().get(1).is_any(&program));
        // Frame slots above the arguments start empty.
        assert!(scope.top().get(2).is_empty());
        assert_eq!(scope.top().sp(), 2 + Method::FRAME_SIZE);
    }

    #[test]
    fn test_lazy_copy_promotes_on_write() {
        let (program, method) = scope_fixture();
        let arguments = [ConcreteType::Class(3), ConcreteType::Class(4)];
        let original = TypeScope::for_method(&program, method, &arguments, words(&program));

        let mut lazy = original.copy_lazily();
        lazy.top_mut().get_mut(0).add(7);
        assert!(lazy.top().get(0).contains(7));
        assert!(
            !original.top().get(0).contains(7),
            "write to the lazy copy must not leak into the original"
        );
    }

    #[test]
    fn test_merge_local_is_commutative() {
        let (program, method) = scope_fixture();
        let words = words(&program);
        let a_args = [ConcreteType::Class(3), ConcreteType::Class(5)];
        let b_args = [ConcreteType::Class(4), ConcreteType::Class(6)];
        let a = TypeScope::for_method(&program, method, &a_args, words);
        let b = TypeScope::for_method(&program, method, &b_args, words);

        let mut ab = a.copy();
        ab.merge(&b, MergeKind::Local);
        let mut ba = b.copy();
        ba.merge(&a, MergeKind::Local);

        for index in 0..ab.top().sp() {
            assert_eq!(ab.top().get(index), ba.top().get(index));
        }
    }

    #[test]
    fn test_merge_return_discards_block_frames() {
        let (program, method) = scope_fixture();
        let words = words(&program);
        let arguments = [ConcreteType::Class(3), ConcreteType::Class(4)];
        let outer = TypeScope::for_method(&program, method, &arguments, words);

        // A block frame above the method frame, with a widened method
        // frame local underneath.
        let block_method = method; // arity 2: receiver + one parameter
        let mut arg = TypeSet::empty(words);
        arg.add(8);
        let mut inner = TypeScope::for_block(
            BlockTemplateId(0),
            block_method,
            &[arg],
            &outer,
            false,
            words,
        );
        inner.at_mut(0).get_mut(0).add(9);

        let mut destination = outer.copy();
        assert!(destination.merge(&inner, MergeKind::Return));
        assert!(destination.top().get(0).contains(9));
        assert_eq!(destination.level(), 0);
    }

    #[test]
    fn test_merge_unwind_stops_at_linked_level() {
        let (program, method) = scope_fixture();
        let words = words(&program);
        let arguments = [ConcreteType::Class(3), ConcreteType::Class(4)];
        let outer = TypeScope::for_method(&program, method, &arguments, words);

        let mut arg = TypeSet::empty(words);
        arg.add(8);
        let linked =
            TypeScope::for_block(BlockTemplateId(0), method, &[arg], &outer, true, words);
        assert!(linked.is_linked());
        assert_eq!(linked.level_linked(), 1);

        let mut unlinked_source = outer.copy();
        unlinked_source.top_mut().get_mut(1).add(9);
        let mut destination = outer.copy();
        // Source is not linked: UNWIND has nothing to merge.
        assert!(!destination.merge(&unlinked_source, MergeKind::Unwind));
        assert!(!destination.top().get(1).contains(9));
    }
}
