//! Compiled-program model for the Opal VM
//!
//! This crate owns everything the analyzer needs to know about a compiled
//! program: the flat bytecode stream and its opcode table, method headers,
//! the literal and global pools, the dispatch table, and the class world
//! (instance field counts, typecheck ranges, well-known class ids).
//! Images are plain JSON documents produced by the compiler backend.

use thiserror::Error;

pub mod builder;
pub mod literal;
pub mod method;
pub mod opcode;
pub mod program;

pub use builder::{ImageBuilder, MethodAsm};
pub use literal::Literal;
pub use method::Method;
pub use opcode::Opcode;
pub use program::{Program, SpecialClasses};

/// Errors produced while loading or validating a program image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to parse program image: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("image declares no classes")]
    NoClasses,

    #[error("class id {id} out of range (class count is {count})")]
    ClassOutOfRange { id: u32, count: u32 },

    #[error("expected {expected} per-class field counts, found {found}")]
    ClassTableMismatch { expected: u32, found: usize },

    #[error("method header at {position} lies outside the bytecode stream")]
    MethodOutOfRange { position: u32 },

    #[error("image declares no entry method")]
    MissingEntryMethod,

    #[error("dispatch table entry {index} references invalid method {target}")]
    BadDispatchEntry { index: usize, target: i32 },

    #[error("class check {index} has invalid id range {start}..{end}")]
    BadClassCheck { index: usize, start: u32, end: u32 },
}
