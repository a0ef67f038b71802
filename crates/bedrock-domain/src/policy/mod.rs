//! Resource and collection policy evaluation.
//!
//! Candidate policies are those attached directly to the resource plus those
//! attached to any collection the resource matches right now. Candidates are
//! ranked by priority (highest first), then creation time, then id; the first
//! one whose conditions pass decides. Deny has no special precedence beyond
//! its priority.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, instrument};

use crate::collection::CollectionMatcher;
use crate::condition::{ConditionContext, ConditionEvaluator};
use crate::error::DomainResult;
use crate::model::{Resource, ResourcePolicy, ResourceSnapshot};
use crate::traits::{CollectionReader, PolicyReader, ResourceReader};

/// A policy that applied, with the collection it came through (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyMatch {
    pub policy: ResourcePolicy,
    pub collection_id: Option<String>,
}

/// Contexts the two policy conditions are evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContexts<'a> {
    /// `{subject, principal, ...context}`
    pub subject: &'a ConditionContext,
    /// Request context keys plus `now`.
    pub request: &'a ConditionContext,
}

/// Ranking used to pick the winning policy.
pub fn policy_order(a: &ResourcePolicy, b: &ResourcePolicy) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Evaluates policies applicable to a resource.
pub struct PolicyEvaluator<S: ?Sized> {
    store: Arc<S>,
    evaluator: ConditionEvaluator,
    matcher: CollectionMatcher,
}

impl<S> PolicyEvaluator<S>
where
    S: PolicyReader + CollectionReader + ResourceReader + ?Sized,
{
    pub fn new(store: Arc<S>, evaluator: ConditionEvaluator) -> Self {
        Self {
            store,
            matcher: CollectionMatcher::new(evaluator.clone()),
            evaluator,
        }
    }

    /// Scopes whose collections may contain the resource: the owner scope,
    /// every linked scope, and the request scope.
    async fn collection_scopes(
        &self,
        resource: &Resource,
        request_scope_id: &str,
    ) -> DomainResult<Vec<String>> {
        let links = self.store.get_resource_scope_links(&resource.id).await?;
        let mut scopes = vec![resource.owner_scope_id.clone()];
        scopes.extend(links.into_iter().map(|l| l.scope_id));
        scopes.push(request_scope_id.to_string());

        let mut seen = HashSet::new();
        scopes.retain(|s| seen.insert(s.clone()));
        Ok(scopes)
    }

    /// Every policy covering `action` on the resource, ranked.
    #[instrument(skip(self, resource, snapshot), fields(resource_id = %resource.id))]
    pub async fn candidates(
        &self,
        resource: &Resource,
        snapshot: &ResourceSnapshot,
        action: &str,
        request_scope_id: &str,
    ) -> DomainResult<Vec<PolicyMatch>> {
        let (direct, scopes) = futures::try_join!(
            self.store.get_resource_policies_for_resource(&resource.id),
            self.collection_scopes(resource, request_scope_id),
        )?;

        let per_scope = try_join_all(scopes.iter().map(|scope_id| {
            self.store
                .get_resource_collections_for_type(&resource.resource_type, scope_id)
        }))
        .await?;

        let mut seen = HashSet::new();
        let matched: Vec<String> = per_scope
            .into_iter()
            .flatten()
            .filter(|c| c.resource_type == resource.resource_type)
            .filter(|c| seen.insert(c.id.clone()))
            .filter(|c| {
                self.matcher
                    .matches(resource, &snapshot.data, &snapshot.tags, &c.match_definition)
            })
            .map(|c| c.id)
            .collect();
        debug!(collections = ?matched, "resource matches collections");

        let collection_policies = try_join_all(
            matched
                .iter()
                .map(|id| self.store.get_resource_policies_for_collection(id)),
        )
        .await?;

        let mut candidates: Vec<PolicyMatch> = direct
            .into_iter()
            .map(|policy| PolicyMatch {
                policy,
                collection_id: None,
            })
            .chain(
                matched
                    .into_iter()
                    .zip(collection_policies)
                    .flat_map(|(collection_id, policies)| {
                        policies.into_iter().map(move |policy| PolicyMatch {
                            policy,
                            collection_id: Some(collection_id.clone()),
                        })
                    }),
            )
            .filter(|m| m.policy.covers(action))
            .collect();

        candidates.sort_by(|a, b| policy_order(&a.policy, &b.policy));
        let mut seen = HashSet::new();
        candidates.retain(|m| seen.insert(m.policy.id.clone()));
        Ok(candidates)
    }

    /// The first applying policy, or `None` to fall through to the
    /// hierarchy and role phases.
    pub async fn decide(
        &self,
        resource: &Resource,
        snapshot: &ResourceSnapshot,
        action: &str,
        request_scope_id: &str,
        contexts: PolicyContexts<'_>,
    ) -> DomainResult<Option<PolicyMatch>> {
        let candidates = self
            .candidates(resource, snapshot, action, request_scope_id)
            .await?;
        Ok(self.first_applying(candidates, contexts))
    }

    /// Walk ranked candidates; both conditions must pass (absent = true).
    pub fn first_applying(
        &self,
        candidates: Vec<PolicyMatch>,
        contexts: PolicyContexts<'_>,
    ) -> Option<PolicyMatch> {
        candidates.into_iter().find(|m| {
            let applies = self
                .evaluator
                .evaluate_optional(m.policy.subject_condition.as_ref(), contexts.subject)
                && self
                    .evaluator
                    .evaluate_optional(m.policy.context_condition.as_ref(), contexts.request);
            if !applies {
                debug!(policy_id = %m.policy.id, "policy conditions not met");
            }
            applies
        })
    }
}
