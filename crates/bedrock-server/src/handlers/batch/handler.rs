//! Batch evaluation handler implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use bedrock_domain::error::{DomainError, DomainResult};
use bedrock_domain::model::{Decision, EvaluationInput, ResourceRef};
use bedrock_domain::traits::DecisionStore;
use bedrock_domain::DecisionEngine;

use super::singleflight::{Singleflight, SingleflightGuard, SingleflightSlot};
use super::types::{
    BatchEvaluateError, BatchEvaluateRequest, BatchEvaluateResponse, BatchEvaluateResult,
    BatchItemResult, MAX_BATCH_SIZE,
};
use crate::config::BatchSettings;

/// Identifies one unique evaluation (used for deduplication).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct EvaluationKey {
    pub scope_id: String,
    pub actor: String,
    pub on_behalf_of: Option<String>,
    pub action: String,
    pub resource: Option<ResourceRef>,
    /// Canonical JSON of the request context (object keys sorted).
    pub context: String,
}

impl EvaluationKey {
    pub fn new(input: &EvaluationInput) -> Self {
        let context: serde_json::Map<String, serde_json::Value> = input
            .context
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            scope_id: input.scope_id.clone(),
            actor: input.actor.clone(),
            on_behalf_of: input.on_behalf_of.clone(),
            action: input.action.clone(),
            resource: input.resource.clone(),
            context: serde_json::Value::Object(context).to_string(),
        }
    }
}

type SharedResult = DomainResult<Decision>;

/// Handler for batch evaluations.
///
/// Processes inputs concurrently with two-stage deduplication:
/// 1. Intra-batch: identical inputs within a batch evaluate once
/// 2. Singleflight: concurrent batches asking the same question share one
///    evaluation
///
/// The decision cache, when enabled, sits inside the engine.
pub struct BatchEvaluateHandler<S: ?Sized> {
    engine: Arc<DecisionEngine<S>>,
    singleflight: Arc<Singleflight<EvaluationKey, SharedResult>>,
    max_batch_size: usize,
    max_concurrency: usize,
}

impl<S> BatchEvaluateHandler<S>
where
    S: DecisionStore + ?Sized + 'static,
{
    pub fn new(engine: Arc<DecisionEngine<S>>) -> Self {
        Self::with_settings(engine, &BatchSettings::default())
    }

    /// Batch sizes above `MAX_BATCH_SIZE` are clamped.
    pub fn with_settings(engine: Arc<DecisionEngine<S>>, settings: &BatchSettings) -> Self {
        Self {
            engine,
            singleflight: Arc::new(Singleflight::new()),
            max_batch_size: settings.max_batch_size.clamp(1, MAX_BATCH_SIZE),
            max_concurrency: settings.max_concurrency.max(1),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Validates a batch request.
    pub fn validate(&self, request: &BatchEvaluateRequest) -> BatchEvaluateResult<()> {
        if request.inputs.is_empty() {
            return Err(BatchEvaluateError::EmptyBatch);
        }

        if request.inputs.len() > self.max_batch_size {
            return Err(BatchEvaluateError::BatchTooLarge {
                size: request.inputs.len(),
                max: self.max_batch_size,
            });
        }

        for (index, input) in request.inputs.iter().enumerate() {
            let blank = [
                ("actor", input.actor.as_str()),
                ("action", input.action.as_str()),
                ("scope_id", input.scope_id.as_str()),
            ]
            .into_iter()
            .find(|(_, value)| value.trim().is_empty());
            if let Some((field, _)) = blank {
                return Err(BatchEvaluateError::InvalidInput {
                    index,
                    message: format!("{} cannot be empty", field),
                });
            }
        }

        Ok(())
    }

    /// Executes a batch request. Results are in input order.
    pub async fn evaluate(
        &self,
        request: BatchEvaluateRequest,
    ) -> BatchEvaluateResult<BatchEvaluateResponse> {
        self.evaluate_with_cancellation(request, &CancellationToken::new())
            .await
    }

    /// Like [`BatchEvaluateHandler::evaluate`], returning `Cancelled` as soon
    /// as `token` fires.
    #[instrument(skip(self, request, token), fields(size = request.inputs.len()))]
    pub async fn evaluate_with_cancellation(
        &self,
        request: BatchEvaluateRequest,
        token: &CancellationToken,
    ) -> BatchEvaluateResult<BatchEvaluateResponse> {
        self.validate(&request)?;

        // Stage 1: intra-batch deduplication
        let mut unique: Vec<(EvaluationKey, &EvaluationInput)> = Vec::new();
        let mut key_to_index: HashMap<EvaluationKey, usize> = HashMap::new();
        let mut position_to_unique: Vec<usize> = Vec::with_capacity(request.inputs.len());

        for input in &request.inputs {
            let key = EvaluationKey::new(input);
            let index = *key_to_index.entry(key.clone()).or_insert_with(|| {
                unique.push((key, input));
                unique.len() - 1
            });
            position_to_unique.push(index);
        }
        debug!(
            total = request.inputs.len(),
            unique = unique.len(),
            "batch deduplicated"
        );

        // Stage 2: bounded concurrent execution with singleflight
        let pending: Vec<_> = unique
            .into_iter()
            .map(|(key, input)| self.execute_with_singleflight(input, key, token))
            .collect();
        let run = stream::iter(pending)
            .buffered(self.max_concurrency)
            .collect::<Vec<BatchItemResult>>();

        let unique_results = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(BatchEvaluateError::Cancelled),
            results = run => results,
        };

        let results = position_to_unique
            .iter()
            .map(|&idx| unique_results[idx].clone())
            .collect();

        Ok(BatchEvaluateResponse { results })
    }

    /// Evaluate one input, sharing the result with concurrent callers asking
    /// the same question.
    async fn execute_with_singleflight(
        &self,
        input: &EvaluationInput,
        key: EvaluationKey,
        token: &CancellationToken,
    ) -> BatchItemResult {
        loop {
            match self.singleflight.acquire(key.clone()) {
                SingleflightSlot::Follower(mut receiver) => {
                    let received = tokio::select! {
                        biased;
                        _ = token.cancelled() => return cancelled(),
                        received = receiver.recv() => received,
                    };
                    match received {
                        Ok(result) => return result.into(),
                        // The leader went away without a result; take over.
                        Err(_) => continue,
                    }
                }
                SingleflightSlot::Leader(sender) => {
                    let guard = SingleflightGuard::new(&self.singleflight, key);

                    let result = self.engine.evaluate_with_cancellation(input, token).await;

                    // A cancellation belongs to this caller only; followers
                    // see the closed channel and re-run the evaluation.
                    if !matches!(result, Err(DomainError::Cancelled)) {
                        let _ = sender.send(result.clone());
                    }
                    guard.complete();

                    return result.into();
                }
            }
        }
    }

    /// Returns (total_inputs, unique_inputs) for a request.
    pub fn dedup_stats(&self, request: &BatchEvaluateRequest) -> (usize, usize) {
        let seen: HashSet<EvaluationKey> = request.inputs.iter().map(EvaluationKey::new).collect();
        (request.inputs.len(), seen.len())
    }
}

fn cancelled() -> BatchItemResult {
    BatchItemResult {
        decision: None,
        error: Some(DomainError::Cancelled),
    }
}
