//! Type variables: lattice cells with subscribers.

use crate::templates::MethodTemplateId;
use crate::type_set::TypeSet;

/// A growing type set plus the method templates that depend on it.
///
/// Widening a variable must re-enqueue every subscriber; the enqueueing
/// itself goes through the propagator (which owns the dirty queue), so
/// this type only reports whether a merge widened and who is watching.
#[derive(Debug)]
pub struct TypeVariable {
    set: TypeSet,
    users: Vec<MethodTemplateId>,
}

impl TypeVariable {
    pub fn new(words_per_type: usize) -> TypeVariable {
        TypeVariable {
            set: TypeSet::empty(words_per_type),
            users: Vec::new(),
        }
    }

    pub fn type_set(&self) -> &TypeSet {
        &self.set
    }

    /// Union `other` in; true iff the variable widened.
    pub fn merge(&mut self, other: &TypeSet) -> bool {
        self.set.add_all(other)
    }

    /// Subscribe `user` to future widenings.
    pub fn add_user(&mut self, user: MethodTemplateId) {
        if !self.users.contains(&user) {
            self.users.push(user);
        }
    }

    pub fn users(&self) -> &[MethodTemplateId] {
        &self.users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_widens_once() {
        let mut variable = TypeVariable::new(2);
        let mut incoming = TypeSet::empty(2);
        incoming.add(4);
        assert!(variable.merge(&incoming));
        assert!(!variable.merge(&incoming));
        assert!(variable.type_set().contains(4));
    }

    #[test]
    fn test_users_deduplicate() {
        let mut variable = TypeVariable::new(2);
        variable.add_user(MethodTemplateId(1));
        variable.add_user(MethodTemplateId(2));
        variable.add_user(MethodTemplateId(1));
        assert_eq!(variable.users().len(), 2);
    }
}
