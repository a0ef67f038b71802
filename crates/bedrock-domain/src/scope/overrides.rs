//! Three-tier override resolution.
//!
//! Each tier is an `on`/`off`/`unset` toggle. For one role-permission edge
//! the chain is searched nearest scope first; at a scope, the most specific
//! tier with a set state decides (role-permission, then permission, then
//! role). `unset` everywhere leaves the base edge untouched.

use serde_json::Value;

use crate::model::{OverrideState, ScopeOverrides};

/// The override tier that decided an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideTier {
    Role,
    Permission,
    RolePermission,
}

/// Outcome of resolving one edge against the override chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeResolution<'a> {
    /// No override applies.
    Unchanged,
    Disabled {
        scope_id: &'a str,
        tier: OverrideTier,
    },
    Enabled {
        scope_id: &'a str,
        tier: OverrideTier,
        /// Replacement condition; only the role-permission tier carries one.
        condition: Option<&'a Value>,
    },
}

impl<'a> EdgeResolution<'a> {
    /// The condition gating the edge after overrides, or `None` when the
    /// edge is removed. The inner `None` means "unconditional".
    pub fn effective_condition(self, base: Option<&'a Value>) -> Option<Option<&'a Value>> {
        match self {
            EdgeResolution::Unchanged => Some(base),
            EdgeResolution::Disabled { .. } => None,
            EdgeResolution::Enabled { condition, .. } => Some(condition.or(base)),
        }
    }
}

/// Overrides of the visible scope chain, nearest scope first.
#[derive(Debug, Default)]
pub struct OverrideChain {
    levels: Vec<(String, ScopeOverrides)>,
}

impl OverrideChain {
    pub fn new(levels: Vec<(String, ScopeOverrides)>) -> Self {
        Self { levels }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|(_, o)| o.is_empty())
    }

    pub fn resolve(&self, role_id: &str, permission_id: &str) -> EdgeResolution<'_> {
        for (scope_id, overrides) in &self.levels {
            let edge = overrides.role_permissions.iter().find(|o| {
                o.role_id == role_id && o.permission_id == permission_id && is_set(o.state)
            });
            if let Some(o) = edge {
                return decide(scope_id, OverrideTier::RolePermission, o.state, o.condition.as_ref());
            }

            let permission = overrides
                .permissions
                .iter()
                .find(|o| o.permission_id == permission_id && is_set(o.state));
            if let Some(o) = permission {
                return decide(scope_id, OverrideTier::Permission, o.state, None);
            }

            let role = overrides
                .roles
                .iter()
                .find(|o| o.role_id == role_id && is_set(o.state));
            if let Some(o) = role {
                return decide(scope_id, OverrideTier::Role, o.state, None);
            }
        }
        EdgeResolution::Unchanged
    }
}

fn is_set(state: OverrideState) -> bool {
    state != OverrideState::Unset
}

fn decide<'a>(
    scope_id: &'a str,
    tier: OverrideTier,
    state: OverrideState,
    condition: Option<&'a Value>,
) -> EdgeResolution<'a> {
    match state {
        OverrideState::Off => EdgeResolution::Disabled { scope_id, tier },
        // Unset never reaches here.
        _ => EdgeResolution::Enabled {
            scope_id,
            tier,
            condition,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PermissionOverride, RoleOverride, RolePermissionOverride};
    use serde_json::json;

    fn role(scope: &str, role: &str, state: OverrideState) -> RoleOverride {
        RoleOverride {
            scope_id: scope.into(),
            role_id: role.into(),
            state,
        }
    }

    fn perm(scope: &str, permission: &str, state: OverrideState) -> PermissionOverride {
        PermissionOverride {
            scope_id: scope.into(),
            permission_id: permission.into(),
            state,
        }
    }

    fn edge(
        scope: &str,
        state: OverrideState,
        condition: Option<Value>,
    ) -> RolePermissionOverride {
        RolePermissionOverride {
            scope_id: scope.into(),
            role_id: "editor".into(),
            permission_id: "doc.read".into(),
            state,
            condition,
        }
    }

    #[test]
    fn test_no_overrides_leave_edge_unchanged() {
        let chain = OverrideChain::default();
        let base = json!({"==": [1, 1]});
        let resolution = chain.resolve("editor", "doc.read");
        assert_eq!(resolution, EdgeResolution::Unchanged);
        assert_eq!(resolution.effective_condition(Some(&base)), Some(Some(&base)));
    }

    #[test]
    fn test_off_removes_unconditioned_edge() {
        let chain = OverrideChain::new(vec![(
            "team".into(),
            ScopeOverrides {
                role_permissions: vec![edge("team", OverrideState::Off, None)],
                ..Default::default()
            },
        )]);
        assert_eq!(chain.resolve("editor", "doc.read").effective_condition(None), None);
    }

    #[test]
    fn test_role_permission_condition_replaces_base() {
        let replacement = json!({"==": [{"var": "context.mfa"}, true]});
        let chain = OverrideChain::new(vec![(
            "team".into(),
            ScopeOverrides {
                role_permissions: vec![edge("team", OverrideState::On, Some(replacement.clone()))],
                ..Default::default()
            },
        )]);
        let base = json!(false);
        assert_eq!(
            chain.resolve("editor", "doc.read").effective_condition(Some(&base)),
            Some(Some(&replacement))
        );
    }

    #[test]
    fn test_most_specific_tier_wins_at_same_scope() {
        let chain = OverrideChain::new(vec![(
            "team".into(),
            ScopeOverrides {
                roles: vec![role("team", "editor", OverrideState::Off)],
                permissions: vec![perm("team", "doc.read", OverrideState::Off)],
                role_permissions: vec![edge("team", OverrideState::On, None)],
            },
        )]);
        assert!(matches!(
            chain.resolve("editor", "doc.read"),
            EdgeResolution::Enabled {
                tier: OverrideTier::RolePermission,
                ..
            }
        ));
        // Another permission of the same role only sees the role tier.
        assert!(matches!(
            chain.resolve("editor", "doc.delete"),
            EdgeResolution::Disabled {
                tier: OverrideTier::Role,
                ..
            }
        ));
    }

    #[test]
    fn test_nearest_scope_wins_over_specificity() {
        let chain = OverrideChain::new(vec![
            (
                "child".into(),
                ScopeOverrides {
                    roles: vec![role("child", "editor", OverrideState::Off)],
                    ..Default::default()
                },
            ),
            (
                "parent".into(),
                ScopeOverrides {
                    role_permissions: vec![edge("parent", OverrideState::On, None)],
                    ..Default::default()
                },
            ),
        ]);
        assert_eq!(
            chain.resolve("editor", "doc.read"),
            EdgeResolution::Disabled {
                scope_id: "child",
                tier: OverrideTier::Role
            }
        );
    }

    #[test]
    fn test_unset_falls_through_to_farther_scope() {
        let chain = OverrideChain::new(vec![
            (
                "child".into(),
                ScopeOverrides {
                    role_permissions: vec![edge("child", OverrideState::Unset, None)],
                    ..Default::default()
                },
            ),
            (
                "parent".into(),
                ScopeOverrides {
                    permissions: vec![perm("parent", "doc.read", OverrideState::Off)],
                    ..Default::default()
                },
            ),
        ]);
        assert_eq!(
            chain.resolve("editor", "doc.read"),
            EdgeResolution::Disabled {
                scope_id: "parent",
                tier: OverrideTier::Permission
            }
        );
    }
}
