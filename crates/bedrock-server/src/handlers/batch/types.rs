//! Data types for batch evaluation.

use bedrock_domain::error::DomainError;
use bedrock_domain::model::{Decision, EvaluationInput};

/// Maximum number of inputs per batch request.
pub const MAX_BATCH_SIZE: usize = 50;

/// Request for several evaluations at once.
#[derive(Debug, Clone)]
pub struct BatchEvaluateRequest {
    pub inputs: Vec<EvaluationInput>,
}

impl BatchEvaluateRequest {
    pub fn new(inputs: Vec<EvaluationInput>) -> Self {
        Self { inputs }
    }
}

/// Outcome of a single evaluation within a batch.
///
/// Exactly one of `decision` and `error` is set. A failed item does not
/// fail the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemResult {
    pub decision: Option<Decision>,
    pub error: Option<DomainError>,
}

impl BatchItemResult {
    pub fn allowed(&self) -> bool {
        self.decision.as_ref().is_some_and(|d| d.allowed)
    }
}

impl From<Result<Decision, DomainError>> for BatchItemResult {
    fn from(result: Result<Decision, DomainError>) -> Self {
        match result {
            Ok(decision) => Self {
                decision: Some(decision),
                error: None,
            },
            Err(error) => Self {
                decision: None,
                error: Some(error),
            },
        }
    }
}

/// Response from a batch evaluation.
#[derive(Debug, Clone)]
pub struct BatchEvaluateResponse {
    /// One result per input, in request order.
    pub results: Vec<BatchItemResult>,
}

/// Errors that reject a whole batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchEvaluateError {
    /// The batch request is empty.
    #[error("batch request cannot be empty")]
    EmptyBatch,

    /// The batch request exceeds the maximum allowed size.
    #[error("batch size {size} exceeds maximum allowed {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// An input is malformed.
    #[error("invalid input at index {index}: {message}")]
    InvalidInput { index: usize, message: String },

    /// The caller cancelled the batch.
    #[error("batch evaluation cancelled")]
    Cancelled,
}

/// Result type for batch operations.
pub type BatchEvaluateResult<T> = Result<T, BatchEvaluateError>;
