//! Batch evaluation handler with two-stage deduplication.
//!
//! Evaluates up to [`MAX_BATCH_SIZE`] inputs in one request:
//!
//! 1. **Intra-batch deduplication**: identical inputs (same actor, principal,
//!    action, resource, scope and context) are evaluated once
//! 2. **Singleflight**: concurrent batches asking the same question share
//!    one evaluation
//!
//! Results come back in request order. A failing input yields an error
//! result at its position; only malformed requests fail the whole batch.

mod handler;
mod singleflight;
mod types;

pub use handler::BatchEvaluateHandler;
pub use types::{
    BatchEvaluateError, BatchEvaluateRequest, BatchEvaluateResponse, BatchEvaluateResult,
    BatchItemResult, MAX_BATCH_SIZE,
};
