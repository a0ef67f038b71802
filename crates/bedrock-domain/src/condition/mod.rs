//! Condition evaluation.
//!
//! Conditions gate role grants, policies and collection membership. They are
//! JSON data parsed into an immutable [`Expr`] tree and evaluated by a pure
//! recursive walk; there is no way to express loops, calls or side effects.
//!
//! # Failure model
//!
//! Every error (malformed tree, unknown operator, missing variable, type
//! mismatch) makes the condition evaluate to `false`. Errors never cross
//! [`ConditionEvaluator`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             Condition Module                 │
//! ├─────────────────────────────────────────────┤
//! │  Expr               - Parsed condition tree │
//! │  ConditionCache     - Caches parsed trees   │
//! │  ConditionContext   - Variable bindings     │
//! │  ConditionEvaluator - Fail-closed boundary  │
//! │  ConditionError     - Parse/eval errors     │
//! └─────────────────────────────────────────────┘
//! ```

mod cache;
mod context;
mod error;
mod expression;

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

pub use cache::{ConditionCache, ConditionCacheConfig};
pub use context::{lookup_path, ConditionContext};
pub use error::ConditionError;
pub use expression::{CompareOp, Expr, TextOp, MAX_DEPTH, MAX_NODES};

pub(crate) use expression::{as_timestamp, compare, loose_eq};

/// Result type for condition operations.
pub type ConditionResult<T> = Result<T, ConditionError>;

/// Fail-closed condition evaluator.
///
/// Cheap to clone; safe to share across concurrent evaluations.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator {
    cache: Option<Arc<ConditionCache>>,
}

impl ConditionEvaluator {
    /// Evaluator that parses every condition on use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluator backed by a shared parse cache.
    pub fn with_cache(cache: Arc<ConditionCache>) -> Self {
        Self { cache: Some(cache) }
    }

    /// Evaluate `condition` against `ctx`, returning `false` on any error.
    pub fn evaluate(&self, condition: &Value, ctx: &ConditionContext) -> bool {
        match self.try_evaluate(condition, ctx) {
            Ok(result) => result,
            Err(err) => {
                debug!(error = %err, condition = %condition, "condition failed closed");
                false
            }
        }
    }

    /// Evaluate an optional condition; absence means "always true".
    pub fn evaluate_optional(&self, condition: Option<&Value>, ctx: &ConditionContext) -> bool {
        condition.map_or(true, |c| self.evaluate(c, ctx))
    }

    /// Evaluate without the fail-closed mapping. Used by validation and
    /// tests that need to see why a condition failed.
    pub fn try_evaluate(&self, condition: &Value, ctx: &ConditionContext) -> ConditionResult<bool> {
        match &self.cache {
            Some(cache) => cache.get_or_parse(condition)?.evaluate_bool(ctx),
            None => Expr::parse(condition)?.evaluate_bool(ctx),
        }
    }
}

/// Evaluate a condition without a cache. Fails closed.
pub fn evaluate(condition: &Value, ctx: &ConditionContext) -> bool {
    ConditionEvaluator::new().evaluate(condition, ctx)
}
