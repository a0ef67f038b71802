//! Condition-specific error types.
//!
//! These never leave the condition module: the public evaluation entry
//! points map every error to `false`.

use thiserror::Error;

/// Errors that can occur while parsing or evaluating a condition tree.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConditionError {
    /// The expression is not a well-formed operator application.
    #[error("malformed condition: {message}")]
    Malformed { message: String },

    /// The operator name is not part of the condition language.
    #[error("unknown operator '{operator}'")]
    UnknownOperator { operator: String },

    /// Wrong number of arguments for an operator.
    #[error("operator '{operator}' expects {expected} argument(s), got {actual}")]
    Arity {
        operator: String,
        expected: String,
        actual: usize,
    },

    /// The expression exceeds the depth or node budget.
    #[error("condition too complex: {message}")]
    TooComplex { message: String },

    /// A referenced variable is absent from the context.
    #[error("missing variable '{path}'")]
    MissingVariable { path: String },

    /// Operand types do not fit the operator.
    #[error("type mismatch in '{operator}': expected {expected}, got {actual}")]
    TypeMismatch {
        operator: String,
        expected: String,
        actual: String,
    },
}
