//! Request handlers.
//!
//! - `evaluate` - a single evaluation
//! - `batch` - up to 50 evaluations with deduplication
//! - `definitions` - validated writes of permissions, grants, overrides,
//!   collections and policies

pub mod batch;
pub mod definitions;
pub mod evaluate;

pub use batch::{BatchEvaluateError, BatchEvaluateHandler, BatchEvaluateRequest};
pub use definitions::{DefinitionError, DefinitionWriter};
pub use evaluate::EvaluateHandler;
