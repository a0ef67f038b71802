//! Role-based permission resolution over the scope tree.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, instrument, warn};

use super::overrides::{EdgeResolution, OverrideChain};
use crate::condition::{ConditionContext, ConditionEvaluator};
use crate::error::{DomainError, DomainResult};
use crate::model::{Scope, ScopeMode};
use crate::traits::{RoleReader, ScopeReader, SubjectReader};

/// What is being asked of the role graph.
#[derive(Debug, Clone, Copy)]
pub struct PermissionQuery<'a> {
    pub action: &'a str,
    /// `None` for requests without a resource.
    pub resource_type: Option<&'a str>,
    /// Key matched against permission resource patterns.
    pub resource_key: &'a str,
}

/// The edge that granted a permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub subject_id: String,
    pub role_id: String,
    pub permission_id: String,
    /// Scope of the membership through which the role was held.
    pub scope_id: String,
    /// Whether a condition had to pass.
    pub conditional: bool,
}

/// Resolves effective role grants of a subject within a scope.
pub struct ScopeResolver<S: ?Sized> {
    store: Arc<S>,
    evaluator: ConditionEvaluator,
    max_scope_depth: u32,
}

impl<S> ScopeResolver<S>
where
    S: SubjectReader + ScopeReader + RoleReader + ?Sized,
{
    pub fn new(store: Arc<S>, evaluator: ConditionEvaluator, max_scope_depth: u32) -> Self {
        Self {
            store,
            evaluator,
            max_scope_depth,
        }
    }

    /// Scopes whose roles are visible from `scope_id`, nearest first.
    ///
    /// The target scope is always visible. Its parent is visible only while
    /// the current scope is `MERGE`; a `DEFINE` scope ends the chain.
    ///
    /// # Errors
    ///
    /// `ScopeNotFound` for the target or a missing parent,
    /// `ScopeCycleDetected` when the parent chain loops, and
    /// `DepthLimitExceeded` past `max_scope_depth` scopes.
    #[instrument(skip(self))]
    pub async fn visible_scopes(&self, scope_id: &str) -> DomainResult<Vec<Scope>> {
        let mut chain: Vec<Scope> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut current = scope_id.to_string();

        loop {
            let scope = self.store.get_scope(&current).await?.ok_or_else(|| {
                DomainError::ScopeNotFound {
                    scope_id: current.clone(),
                }
            })?;
            seen.insert(scope.id.clone());
            let parent = match (scope.mode, &scope.parent_id) {
                (ScopeMode::Merge, Some(parent)) => Some(parent.clone()),
                _ => None,
            };
            chain.push(scope);

            let Some(parent) = parent else {
                return Ok(chain);
            };
            if seen.contains(&parent) {
                let mut path: Vec<&str> = chain.iter().map(|s| s.id.as_str()).collect();
                path.push(&parent);
                let path = path.join(" -> ");
                warn!(%path, "cycle in scope tree");
                return Err(DomainError::ScopeCycleDetected { path });
            }
            if chain.len() >= self.max_scope_depth as usize {
                return Err(DomainError::DepthLimitExceeded {
                    max_depth: self.max_scope_depth,
                });
            }
            current = parent;
        }
    }

    /// Finds the first surviving role-permission edge that grants `query`
    /// to `subject_id` in `scope_id`.
    ///
    /// Any passing edge grants (OR across roles and edges). Edges are tried
    /// in a fixed order (nearest membership scope, then role id, then
    /// permission id) so the reported grant is deterministic.
    #[instrument(skip(self, query, ctx), fields(action = query.action))]
    pub async fn resolve(
        &self,
        subject_id: &str,
        scope_id: &str,
        query: &PermissionQuery<'_>,
        ctx: &ConditionContext,
    ) -> DomainResult<Option<RoleGrant>> {
        let chain = self.visible_scopes(scope_id).await?;
        let scope_ids: Vec<String> = chain.iter().map(|s| s.id.clone()).collect();

        let (memberships, overrides) = futures::try_join!(
            self.store.get_memberships(subject_id, &scope_ids),
            try_join_all(
                scope_ids
                    .iter()
                    .map(|id| self.store.get_scope_overrides(id))
            ),
        )?;

        // role -> (distance of nearest membership, membership scope)
        let mut held: HashMap<String, (usize, String)> = HashMap::new();
        for m in memberships {
            let Some(distance) = scope_ids.iter().position(|id| *id == m.scope_id) else {
                continue;
            };
            held.entry(m.role_id)
                .and_modify(|entry| {
                    if distance < entry.0 {
                        *entry = (distance, m.scope_id.clone());
                    }
                })
                .or_insert((distance, m.scope_id));
        }
        if held.is_empty() {
            debug!(subject_id, scope_id, "no memberships in visible scopes");
            return Ok(None);
        }

        let mut role_ids: Vec<String> = held.keys().cloned().collect();
        role_ids.sort_by(|a, b| held[a].0.cmp(&held[b].0).then_with(|| a.cmp(b)));

        let mut edges = self.store.get_role_permissions_for_roles(&role_ids).await?;
        edges.retain(|e| held.contains_key(&e.role_id));
        edges.sort_by(|a, b| {
            held[&a.role_id]
                .0
                .cmp(&held[&b.role_id].0)
                .then_with(|| a.role_id.cmp(&b.role_id))
                .then_with(|| a.permission.id.cmp(&b.permission.id))
        });

        let chain = OverrideChain::new(scope_ids.into_iter().zip(overrides).collect());

        for edge in &edges {
            if !edge
                .permission
                .matches(query.action, query.resource_type, query.resource_key)
            {
                continue;
            }
            let resolution = chain.resolve(&edge.role_id, &edge.permission.id);
            let Some(condition) = resolution.effective_condition(edge.condition.as_ref()) else {
                if let EdgeResolution::Disabled { scope_id, tier } = resolution {
                    debug!(
                        role_id = %edge.role_id,
                        permission_id = %edge.permission.id,
                        scope_id,
                        ?tier,
                        "edge disabled by override"
                    );
                }
                continue;
            };
            if self.evaluator.evaluate_optional(condition, ctx) {
                return Ok(Some(RoleGrant {
                    subject_id: subject_id.to_string(),
                    role_id: edge.role_id.clone(),
                    permission_id: edge.permission.id.clone(),
                    scope_id: held[&edge.role_id].1.clone(),
                    conditional: condition.is_some(),
                }));
            }
        }

        Ok(None)
    }
}
