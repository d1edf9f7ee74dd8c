//! Argument-tuple keys for method specialization.

use crate::templates::BlockTemplateId;

/// One element of a specialization key: a single class, a specific block
/// identity, or the widened placeholder for megamorphic positions.
///
/// Block arguments are never merged across call sites — two tuples that
/// differ only in block identity name different specializations. The
/// `matches_ignoring_blocks` comparison collapses that distinction for
/// callers that want block-insensitive grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConcreteType {
    Class(u32),
    Block(BlockTemplateId),
    Any,
}

impl ConcreteType {
    pub fn is_block(&self) -> bool {
        matches!(self, ConcreteType::Block(_))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, ConcreteType::Any)
    }

    pub fn id(&self) -> u32 {
        match self {
            ConcreteType::Class(id) => *id,
            _ => panic!("not a class type"),
        }
    }

    pub fn block(&self) -> BlockTemplateId {
        match self {
            ConcreteType::Block(block) => *block,
            _ => panic!("not a block type"),
        }
    }

    pub fn matches(&self, other: &ConcreteType) -> bool {
        self == other
    }

    pub fn matches_ignoring_blocks(&self, other: &ConcreteType) -> bool {
        if self.is_block() {
            return other.is_block();
        }
        self == other
    }

    /// Element-wise tuple comparison.
    pub fn tuples_match(x: &[ConcreteType], y: &[ConcreteType], ignore_blocks: bool) -> bool {
        x.len() == y.len()
            && x.iter().zip(y.iter()).all(|(a, b)| {
                if ignore_blocks {
                    a.matches_ignoring_blocks(b)
                } else {
                    a.matches(b)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_identity_matters() {
        let a = ConcreteType::Block(BlockTemplateId(1));
        let b = ConcreteType::Block(BlockTemplateId(2));
        assert!(!a.matches(&b));
        assert!(a.matches_ignoring_blocks(&b));
        assert!(a.matches(&a));
    }

    #[test]
    fn test_tuples_match() {
        let x = [ConcreteType::Class(3), ConcreteType::Block(BlockTemplateId(1))];
        let y = [ConcreteType::Class(3), ConcreteType::Block(BlockTemplateId(9))];
        assert!(!ConcreteType::tuples_match(&x, &y, false));
        assert!(ConcreteType::tuples_match(&x, &y, true));
        assert!(!ConcreteType::tuples_match(&x, &y[..1], true));
    }

    #[test]
    fn test_any_is_its_own_kind() {
        assert!(ConcreteType::Any.is_any());
        assert!(!ConcreteType::Any.matches(&ConcreteType::Class(0)));
    }
}
