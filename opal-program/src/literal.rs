//! Runtime values as they appear in the literal and global pools.

use serde::{Deserialize, Serialize};

/// A runtime object snapshotted into the program image.
///
/// The analyzer only ever asks for an object's class, so the payloads are
/// kept as simple as the image format allows. Lazily initialized globals
/// are `Instance`s of the lazy-initializer class whose first field holds
/// the initializer's method header position as a `Smi`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Smi(i64),
    LargeInt(i64),
    Float(f64),
    String(String),
    ByteArray(Vec<u8>),
    Array(Vec<Literal>),
    Instance { class: u32, fields: Vec<Literal> },
}

impl Literal {
    pub fn is_instance_of(&self, class: u32) -> bool {
        matches!(self, Literal::Instance { class: c, .. } if *c == class)
    }

    /// The method header position stored in field 0, if this literal is a
    /// lazy-initializer record.
    pub fn initializer_method(&self) -> Option<u32> {
        match self {
            Literal::Instance { fields, .. } => match fields.first() {
                Some(Literal::Smi(id)) if *id >= 0 => Some(*id as u32),
                _ => None,
            },
            _ => None,
        }
    }
}
