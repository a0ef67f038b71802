//! The decision engine.
//!
//! Orchestrates one evaluation as a fixed sequence of phases:
//!
//! ```text
//! Resolving ──▶ Policy ──▶ Hierarchy ──▶ Role ──▶ Decided
//!                 │            │
//!                 └─ match ────┴─ inherited allow ──▶ Decided
//! ```
//!
//! Requests without a resource skip the policy and hierarchy phases.
//!
//! # Architecture Decisions
//!
//! - **Stateless**: the engine holds only its injected store and
//!   configuration. Concurrent evaluations share nothing mutable beyond the
//!   optional caches.
//! - **Fail closed**: any error aborts the evaluation with `Err`; a partial
//!   or default decision is never returned.
//! - **Timeout Handling**: every evaluation is bounded by
//!   `EngineConfig::timeout`; callers can also cancel through a
//!   `CancellationToken`.
//! - **Delegation**: with `on_behalf_of`, the role and hierarchy phases need
//!   both the actor and the principal to be granted.

mod config;
mod context;

#[cfg(test)]
pub(crate) mod tests;

pub use config::EngineConfig;

use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cache::DecisionKey;
use crate::condition::ConditionEvaluator;
use crate::error::{DomainError, DomainResult};
use crate::hierarchy::HierarchyWalker;
use crate::model::{
    Decision, DecisionMatch, Effect, EvaluationInput, Resource, ResourceLocator, ResourceRef,
    ResourceSnapshot, Scope, Subject,
};
use crate::policy::{PolicyContexts, PolicyEvaluator, PolicyMatch};
use crate::scope::{PermissionQuery, RoleGrant, ScopeResolver};
use crate::traits::DecisionStore;

use context::RequestFacts;

/// Produces allow/deny decisions with an explanation trail.
pub struct DecisionEngine<S: ?Sized> {
    store: Arc<S>,
    config: EngineConfig,
    scopes: ScopeResolver<S>,
    policies: PolicyEvaluator<S>,
    hierarchy: HierarchyWalker<S>,
}

impl<S: DecisionStore + ?Sized> DecisionEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: EngineConfig) -> Self {
        let evaluator = match &config.condition_cache {
            Some(cache) => ConditionEvaluator::with_cache(Arc::clone(cache)),
            None => ConditionEvaluator::new(),
        };
        Self {
            scopes: ScopeResolver::new(
                Arc::clone(&store),
                evaluator.clone(),
                config.max_scope_depth,
            ),
            policies: PolicyEvaluator::new(Arc::clone(&store), evaluator),
            hierarchy: HierarchyWalker::new(Arc::clone(&store), config.max_hierarchy_depth),
            store,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate one authorization question.
    ///
    /// # Errors
    ///
    /// `InvalidInput`, the `*NotFound` variants for unresolvable references,
    /// integrity errors for cyclic or over-deep graphs, `StoreUnavailable`
    /// and `Timeout`.
    #[instrument(
        skip(self, input),
        fields(actor = %input.actor, action = %input.action, scope_id = %input.scope_id)
    )]
    pub async fn evaluate(&self, input: &EvaluationInput) -> DomainResult<Decision> {
        validate_input(input)?;

        let cache = self
            .config
            .decision_cache
            .as_ref()
            .filter(|c| c.is_enabled());
        let cache_key = cache.and_then(|_| DecisionKey::for_input(input));
        if let (Some(cache), Some(key)) = (cache, &cache_key) {
            if let Some(decision) = cache.get(key).await {
                debug!("decision served from cache");
                return Ok(decision);
            }
        }

        let (decision, resource_id) =
            tokio::time::timeout(self.config.timeout, self.evaluate_uncached(input))
                .await
                .map_err(|_| DomainError::Timeout {
                    duration_ms: self.config.timeout.as_millis() as u64,
                })??;

        if let (Some(cache), Some(key)) = (cache, cache_key) {
            cache
                .insert(key, resource_id.as_deref(), decision.clone())
                .await;
        }
        Ok(decision)
    }

    /// Like [`DecisionEngine::evaluate`], aborting with `Cancelled` as soon
    /// as `token` fires.
    pub async fn evaluate_with_cancellation(
        &self,
        input: &EvaluationInput,
        token: &CancellationToken,
    ) -> DomainResult<Decision> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(actor = %input.actor, "evaluation cancelled");
                Err(DomainError::Cancelled)
            }
            result = self.evaluate(input) => result,
        }
    }

    /// Runs the phases, returning the decision and the resolved resource id.
    async fn evaluate_uncached(
        &self,
        input: &EvaluationInput,
    ) -> DomainResult<(Decision, Option<String>)> {
        let principal = async {
            match &input.on_behalf_of {
                Some(id) => self.require_subject(id).await.map(Some),
                None => Ok(None),
            }
        };
        let resource = async {
            match &input.resource {
                Some(r) => self.resolve_resource(r).await.map(Some),
                None => Ok(None),
            }
        };
        let (actor, principal, resource, _scope) = futures::try_join!(
            self.require_subject(&input.actor),
            principal,
            resource,
            self.require_scope(&input.scope_id),
        )?;

        let facts = RequestFacts {
            input,
            actor: &actor,
            principal: principal.as_ref(),
            now: Utc::now(),
        };

        let Some(resource) = resource else {
            debug!("no resource; role phase only");
            return Ok((self.role_phase(&facts, None).await?, None));
        };
        let decision = self.resource_phases(&facts, &resource).await?;
        Ok((decision, Some(resource.id)))
    }

    async fn resource_phases(
        &self,
        facts: &RequestFacts<'_>,
        resource: &Resource,
    ) -> DomainResult<Decision> {
        let input = facts.input;
        let snapshot = self.store.get_resource_snapshot(&resource.id).await?;

        // Policy phase
        let subject_ctx = facts.subject_context();
        let request_ctx = facts.request_context();
        let policy = self
            .policies
            .decide(
                resource,
                &snapshot,
                &input.action,
                &input.scope_id,
                PolicyContexts {
                    subject: &subject_ctx,
                    request: &request_ctx,
                },
            )
            .await?;
        if let Some(matched) = policy {
            return Ok(policy_decision(matched, &input.action));
        }

        // Hierarchy phase
        let ancestors = self.hierarchy.ancestors_with_cascade(&resource.id).await?;
        debug!(count = ancestors.len(), "hierarchy phase");
        for ancestor in ancestors {
            let Some(parent) = self.store.get_resource(&ancestor.resource_id).await? else {
                warn!(resource_id = %ancestor.resource_id, "hierarchy edge to missing resource");
                continue;
            };
            let parent_snapshot = self.store.get_resource_snapshot(&parent.id).await?;
            if let Some(grants) = self
                .role_grants(facts, Some((&parent, &parent_snapshot)))
                .await?
            {
                let mut decision = Decision::allow(format!(
                    "{} allowed through ancestor {} ({} hop(s) up)",
                    input.action, parent.id, ancestor.depth
                ))
                .with_match(DecisionMatch::Inherited {
                    resource_id: parent.id.clone(),
                    depth: ancestor.depth,
                });
                decision.matches.extend(grants.into_iter().map(grant_match));
                decision.inherited_from = Some(parent.id);
                return Ok(decision);
            }
        }

        self.role_phase(facts, Some((resource, &snapshot))).await
    }

    async fn role_phase(
        &self,
        facts: &RequestFacts<'_>,
        resource: Option<(&Resource, &ResourceSnapshot)>,
    ) -> DomainResult<Decision> {
        let action = &facts.input.action;
        match self.role_grants(facts, resource).await? {
            Some(grants) => {
                let explanation = grants
                    .first()
                    .map(|g| {
                        format!(
                            "{action} granted by role {} via permission {} in scope {}",
                            g.role_id, g.permission_id, g.scope_id
                        )
                    })
                    .unwrap_or_else(|| format!("{action} granted by role"));
                let mut decision = Decision::allow(explanation);
                decision.matches.extend(grants.into_iter().map(grant_match));
                Ok(decision)
            }
            None => Ok(Decision::deny(format!(
                "no policy, inherited grant or role grant allows {action}"
            ))),
        }
    }

    /// Grants for the actor and, under delegation, the principal. `None`
    /// unless every required subject is granted.
    async fn role_grants(
        &self,
        facts: &RequestFacts<'_>,
        resource: Option<(&Resource, &ResourceSnapshot)>,
    ) -> DomainResult<Option<Vec<RoleGrant>>> {
        let query = PermissionQuery {
            action: &facts.input.action,
            resource_type: resource.map(|(r, _)| r.resource_type.as_str()),
            resource_key: resource.map_or("", |(r, _)| r.key()),
        };
        let subjects: Vec<&Subject> = std::iter::once(facts.actor).chain(facts.principal).collect();

        let grants = try_join_all(subjects.iter().map(|subject| {
            let ctx = facts.role_context(subject, resource);
            let query = &query;
            async move {
                self.scopes
                    .resolve(&subject.id, &facts.input.scope_id, query, &ctx)
                    .await
            }
        }))
        .await?;

        Ok(grants.into_iter().collect())
    }

    async fn require_subject(&self, subject_id: &str) -> DomainResult<Subject> {
        self.store
            .get_subject(subject_id)
            .await?
            .ok_or_else(|| DomainError::SubjectNotFound {
                subject_id: subject_id.to_string(),
            })
    }

    async fn require_scope(&self, scope_id: &str) -> DomainResult<Scope> {
        self.store
            .get_scope(scope_id)
            .await?
            .ok_or_else(|| DomainError::ScopeNotFound {
                scope_id: scope_id.to_string(),
            })
    }

    async fn resolve_resource(&self, reference: &ResourceRef) -> DomainResult<Resource> {
        let found = match &reference.locator {
            ResourceLocator::Id(id) => self.store.get_resource(id).await?,
            ResourceLocator::ExternalId(external_id) => {
                self.store
                    .get_resource_by_external_id(&reference.resource_type, external_id)
                    .await?
            }
        };
        found
            .filter(|r| r.resource_type == reference.resource_type)
            .ok_or_else(|| DomainError::ResourceNotFound {
                reference: reference.to_string(),
            })
    }
}

fn validate_input(input: &EvaluationInput) -> DomainResult<()> {
    let blank = |field: &str| DomainError::InvalidInput {
        message: format!("{field} must not be empty"),
    };
    if input.actor.trim().is_empty() {
        return Err(blank("actor"));
    }
    if input.action.trim().is_empty() {
        return Err(blank("action"));
    }
    if input.scope_id.trim().is_empty() {
        return Err(blank("scopeId"));
    }
    if input.on_behalf_of.as_deref().is_some_and(|p| p.trim().is_empty()) {
        return Err(blank("onBehalfOf"));
    }
    if let Some(r) = &input.resource {
        let locator_empty = match &r.locator {
            ResourceLocator::Id(id) => id.is_empty(),
            ResourceLocator::ExternalId(ext) => ext.is_empty(),
        };
        if r.resource_type.is_empty() || locator_empty {
            return Err(blank("resource reference"));
        }
    }
    Ok(())
}

fn policy_decision(matched: PolicyMatch, action: &str) -> Decision {
    let PolicyMatch {
        policy,
        collection_id,
    } = matched;
    let via = collection_id
        .as_deref()
        .map(|c| format!(" via collection {c}"))
        .unwrap_or_default();
    let explanation = format!(
        "{action} {} by policy {} (priority {}){via}",
        match policy.effect {
            Effect::Allow => "allowed",
            Effect::Deny => "denied",
        },
        policy.id,
        policy.priority,
    );
    let base = match policy.effect {
        Effect::Allow => Decision::allow(explanation),
        Effect::Deny => Decision::deny(explanation),
    };
    let mut decision = base.with_match(DecisionMatch::Policy {
        policy_id: policy.id.clone(),
        effect: policy.effect,
        priority: policy.priority,
        collection_id,
    });
    decision.evaluated_policy = Some(policy.id);
    decision
}

fn grant_match(grant: RoleGrant) -> DecisionMatch {
    DecisionMatch::RoleGrant {
        subject_id: grant.subject_id,
        role_id: grant.role_id,
        permission_id: grant.permission_id,
        scope_id: grant.scope_id,
        conditional: grant.conditional,
    }
}
