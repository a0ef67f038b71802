//! Single evaluation handler.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bedrock_domain::error::DomainResult;
use bedrock_domain::model::{Decision, EvaluationInput};
use bedrock_domain::traits::DecisionStore;
use bedrock_domain::DecisionEngine;

/// Answers one authorization question and logs its outcome.
///
/// Transient failures (`StoreUnavailable`, `Timeout`) are logged at `warn`
/// and returned unchanged; retrying is the caller's decision. Integrity
/// errors (cycles, depth, corrupt records) are logged at `error`.
pub struct EvaluateHandler<S: ?Sized> {
    engine: Arc<DecisionEngine<S>>,
}

impl<S: DecisionStore + ?Sized> EvaluateHandler<S> {
    pub fn new(engine: Arc<DecisionEngine<S>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<DecisionEngine<S>> {
        &self.engine
    }

    pub async fn evaluate(&self, input: &EvaluationInput) -> DomainResult<Decision> {
        self.evaluate_with_cancellation(input, &CancellationToken::new())
            .await
    }

    pub async fn evaluate_with_cancellation(
        &self,
        input: &EvaluationInput,
        token: &CancellationToken,
    ) -> DomainResult<Decision> {
        let result = self.engine.evaluate_with_cancellation(input, token).await;
        match &result {
            Ok(decision) => info!(
                actor = %input.actor,
                action = %input.action,
                scope_id = %input.scope_id,
                allowed = decision.allowed,
                policy = decision.evaluated_policy.as_deref(),
                inherited_from = decision.inherited_from.as_deref(),
                "evaluation decided"
            ),
            Err(e) if e.is_transient() => warn!(
                actor = %input.actor,
                action = %input.action,
                error = %e,
                "evaluation failed transiently"
            ),
            Err(e) if e.is_integrity_error() => error!(
                actor = %input.actor,
                action = %input.action,
                error = %e,
                "evaluation hit inconsistent data"
            ),
            Err(e) => debug!(actor = %input.actor, error = %e, "evaluation rejected"),
        }
        result
    }
}
