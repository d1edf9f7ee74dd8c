//! Per-method fixpoint worklists.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::type_scope::{MergeKind, TypeScope};

/// Merged incoming state per basic-block entry, plus a LIFO of positions
/// that need (re)processing.
///
/// The stored scope at a position is the join of every path that reached
/// it; the scope handed back by `next` is a lazy copy, so the stored one
/// keeps acting as a sink for future joins.
#[derive(Debug)]
pub struct Worklist {
    unprocessed: Vec<u32>,
    scopes: HashMap<u32, TypeScope>,
}

impl Worklist {
    pub fn new(entry: u32, scope: TypeScope) -> Worklist {
        let mut scopes = HashMap::new();
        scopes.insert(entry, scope);
        Worklist {
            unprocessed: vec![entry],
            scopes,
        }
    }

    /// Register a jump to `position` with the given state. Re-enqueues
    /// the position iff the merge widened anything.
    pub fn add(&mut self, position: u32, scope: &TypeScope) {
        match self.scopes.entry(position) {
            Entry::Vacant(vacant) => {
                vacant.insert(scope.copy());
                self.unprocessed.push(position);
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get_mut().merge(scope, MergeKind::Local) {
                    self.unprocessed.push(position);
                }
            }
        }
    }

    pub fn has_next(&self) -> bool {
        !self.unprocessed.is_empty()
    }

    pub fn next(&mut self) -> Option<(u32, TypeScope)> {
        let position = self.unprocessed.pop()?;
        let scope = self
            .scopes
            .get(&position)
            .map(TypeScope::copy_lazily)
            .unwrap_or_else(|| unreachable!("no scope for enqueued position {position}"));
        Some((position, scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concrete_type::ConcreteType;
    use crate::type_set::TypeSet;
    use opal_program::{ImageBuilder, MethodAsm, Opcode, Program};

    fn fixture() -> (Program, TypeScope) {
        let mut builder = ImageBuilder::new();
        let mut main = MethodAsm::new(1, 4);
        main.op(Opcode::ReturnNull);
        let main = builder.add_method(main);
        builder.entry(main);
        let program = builder.finish().expect("image should validate");
        let method = program.entry();
        let words = TypeSet::words_per_type(program.class_count);
        let scope =
            TypeScope::for_method(&program, method, &[ConcreteType::Class(3)], words);
        (program, scope)
    }

    #[test]
    fn test_first_visit_enqueues() {
        let (_program, scope) = fixture();
        let mut worklist = Worklist::new(4, scope.copy());
        let (position, _) = worklist.next().expect("entry enqueued");
        assert_eq!(position, 4);
        assert!(!worklist.has_next());

        worklist.add(9, &scope);
        assert!(worklist.has_next());
    }

    #[test]
    fn test_repeat_visit_enqueues_only_on_widening() {
        let (_program, scope) = fixture();
        let mut worklist = Worklist::new(4, scope.copy());
        let _ = worklist.next();

        worklist.add(9, &scope);
        let _ = worklist.next();
        worklist.add(9, &scope);
        assert!(!worklist.has_next(), "same state must not re-enqueue");

        let mut widened = scope.copy();
        widened.top_mut().get_mut(0).add(7);
        worklist.add(9, &widened);
        assert!(worklist.has_next(), "widened state re-enqueues");
    }

    #[test]
    fn test_lifo_order() {
        let (_program, scope) = fixture();
        let mut worklist = Worklist::new(4, scope.copy());
        let _ = worklist.next();
        worklist.add(9, &scope);
        worklist.add(13, &scope);
        assert_eq!(worklist.next().map(|(p, _)| p), Some(13));
        assert_eq!(worklist.next().map(|(p, _)| p), Some(9));
    }
}
