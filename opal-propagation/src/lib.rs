//! Whole-program type propagation for compiled Opal programs.
//!
//! Given a `Program`, the propagator computes a conservative
//! over-approximation of the value kinds that can reach every bytecode
//! site and every method parameter. Methods are specialized per tuple of
//! concrete argument types (the Cartesian Product Algorithm); blocks are
//! specialized per creation site and surrounding specialization. The
//! result is a `TypeDatabase` that serializes to a single JSON array.

pub mod concrete_type;
pub mod database;
pub mod primitives;
pub mod propagator;
pub mod templates;
pub mod type_scope;
pub mod type_set;
pub mod type_stack;
pub mod type_variable;
pub mod worklist;

mod interpreter;

pub use concrete_type::ConcreteType;
pub use database::TypeDatabase;
pub use propagator::{Propagator, PropagatorConfig};
pub use templates::{BlockTemplateId, MethodTemplateId, TypeVariableId};
pub use type_scope::{MergeKind, TypeScope};
pub use type_set::TypeSet;
pub use type_stack::TypeStack;
pub use type_variable::TypeVariable;
pub use worklist::Worklist;
