//! Domain error types for authorization evaluation.

use thiserror::Error;

/// Domain-specific errors surfaced by the decision pipeline.
///
/// Malformed conditions never appear here: the condition evaluator fails
/// closed and reports them as `false`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid evaluation input.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Subject (actor or principal) not found.
    #[error("subject not found: {subject_id}")]
    SubjectNotFound { subject_id: String },

    /// Scope not found.
    #[error("scope not found: {scope_id}")]
    ScopeNotFound { scope_id: String },

    /// Resource not found.
    #[error("resource not found: {reference}")]
    ResourceNotFound { reference: String },

    /// Cycle detected in the resource hierarchy.
    #[error("cycle detected in resource hierarchy: {path}")]
    CycleDetected { path: String },

    /// Cycle detected in the scope tree.
    #[error("cycle detected in scope hierarchy: {path}")]
    ScopeCycleDetected { path: String },

    /// Depth limit exceeded during graph traversal.
    #[error("depth limit exceeded (max: {max_depth})")]
    DepthLimitExceeded { max_depth: u32 },

    /// The store returned a record the engine cannot interpret. Retrying
    /// does not help until the data is repaired.
    #[error("corrupt stored data: {message}")]
    CorruptData { message: String },

    /// The backing store failed or timed out.
    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// Timeout during evaluation.
    #[error("timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// The caller cancelled the evaluation.
    #[error("evaluation cancelled")]
    Cancelled,
}

impl DomainError {
    /// Returns true if the caller may retry the evaluation unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DomainError::StoreUnavailable { .. } | DomainError::Timeout { .. }
        )
    }

    /// Returns true for hierarchy integrity violations and corrupt records.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            DomainError::CycleDetected { .. }
                | DomainError::ScopeCycleDetected { .. }
                | DomainError::DepthLimitExceeded { .. }
                | DomainError::CorruptData { .. }
        )
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
