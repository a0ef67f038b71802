//! Scope tree, subjects, roles and the three override tiers.

use std::collections::HashMap;
use std::fmt;

use glob::Pattern;
use serde::{Deserialize, Serialize};

/// How a scope relates to the permission set of its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScopeMode {
    /// Independent permission set; ancestors are not visible.
    Define,
    /// Unions with the parent scope.
    Merge,
}

/// A node in the tenancy tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub id: String,
    pub parent_id: Option<String>,
    pub mode: ScopeMode,
}

impl Scope {
    /// Creates a root scope.
    pub fn root(id: impl Into<String>, mode: ScopeMode) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            mode,
        }
    }

    /// Creates a child scope under `parent_id`.
    pub fn child(id: impl Into<String>, parent_id: impl Into<String>, mode: ScopeMode) -> Self {
        Self {
            id: id.into(),
            parent_id: Some(parent_id.into()),
            mode,
        }
    }
}

/// The kind of actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Service,
    Agent,
    System,
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubjectKind::User => "user",
            SubjectKind::Service => "service",
            SubjectKind::Agent => "agent",
            SubjectKind::System => "system",
        };
        f.write_str(s)
    }
}

/// An actor that can hold role assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub kind: SubjectKind,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Subject {
    pub fn new(id: impl Into<String>, kind: SubjectKind) -> Self {
        Self {
            id: id.into(),
            kind,
            attributes: HashMap::new(),
        }
    }

    /// Adds an attribute visible to conditions as `subject.<key>`.
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Condition view of the subject: attributes plus `id` and `kind`.
    pub fn to_value(&self) -> serde_json::Value {
        let mut view: serde_json::Map<String, serde_json::Value> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        view.insert("id".into(), self.id.clone().into());
        view.insert("kind".into(), self.kind.to_string().into());
        serde_json::Value::Object(view)
    }
}

/// A role assignment of a subject at a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub subject_id: String,
    pub scope_id: String,
    pub role_id: String,
}

/// A named, scoped bundle of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub scope_id: String,
    pub name: String,
}

/// An `(action, resourceType, resourcePattern)` tuple.
///
/// Conditions never live here; they belong to the granting edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: String,
    pub action: String,
    /// Resource type key, or `*` for any type.
    pub resource_type: String,
    /// Glob over resource keys; `*` matches one segment, `**` any number.
    pub resource_pattern: String,
}

impl Permission {
    pub fn new(
        id: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_pattern: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_pattern: resource_pattern.into(),
        }
    }

    /// Tests the permission against a requested action and target.
    ///
    /// `resource_type` is `None` for requests without a resource; only
    /// type-wildcard permissions apply to those.
    pub fn matches(&self, action: &str, resource_type: Option<&str>, resource_key: &str) -> bool {
        if self.action != action {
            return false;
        }
        match resource_type {
            None => self.resource_type == "*",
            Some(rt) => {
                (self.resource_type == "*" || self.resource_type == rt)
                    && pattern_matches(&self.resource_pattern, resource_key)
            }
        }
    }
}

/// Glob match over `/`-separated resource keys. Invalid patterns never match.
///
/// Each segment is matched with glob syntax; a `**` segment absorbs zero or
/// more key segments.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    let compiled: Result<Vec<Option<Pattern>>, _> = pattern
        .split('/')
        .map(|seg| {
            if seg == "**" {
                Ok(None)
            } else {
                Pattern::new(seg).map(Some)
            }
        })
        .collect();
    let Ok(segments) = compiled else {
        return false;
    };
    let key_segments: Vec<&str> = key.split('/').collect();
    match_segments(&segments, &key_segments)
}

/// Most `**` segments a stored resource pattern may carry.
pub const MAX_RECURSIVE_SEGMENTS: usize = 4;

/// Segment match in O(pattern × key): `reachable[j]` holds when the pattern
/// consumed so far matches the first `j` key segments.
fn match_segments(pattern: &[Option<Pattern>], key: &[&str]) -> bool {
    let mut reachable = vec![false; key.len() + 1];
    reachable[0] = true;
    for segment in pattern {
        let mut next = vec![false; key.len() + 1];
        match segment {
            None => {
                let mut seen = false;
                for (j, slot) in next.iter_mut().enumerate() {
                    seen |= reachable[j];
                    *slot = seen;
                }
            }
            Some(glob) => {
                for (j, part) in key.iter().enumerate() {
                    next[j + 1] = reachable[j] && glob.matches(part);
                }
            }
        }
        if !next.contains(&true) {
            return false;
        }
        reachable = next;
    }
    reachable[key.len()]
}

/// A role-to-permission grant edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermission {
    pub role_id: String,
    pub permission: Permission,
    /// Optional condition expression; absent means always true.
    pub condition: Option<serde_json::Value>,
}

/// Toggle state carried by every override tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideState {
    On,
    Off,
    /// No opinion at this scope; resolution continues to farther scopes.
    #[default]
    Unset,
}

/// Enables or disables a role wholesale within a child scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleOverride {
    pub scope_id: String,
    pub role_id: String,
    pub state: OverrideState,
}

/// Enables or disables a permission wholesale within a child scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOverride {
    pub scope_id: String,
    pub permission_id: String,
    pub state: OverrideState,
}

/// Toggles one role-permission edge within a child scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermissionOverride {
    pub scope_id: String,
    pub role_id: String,
    pub permission_id: String,
    pub state: OverrideState,
    /// Replaces the base edge condition when present and the state is `on`.
    pub condition: Option<serde_json::Value>,
}

/// All overrides defined at a single scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeOverrides {
    pub roles: Vec<RoleOverride>,
    pub permissions: Vec<PermissionOverride>,
    pub role_permissions: Vec<RolePermissionOverride>,
}

impl ScopeOverrides {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty() && self.permissions.is_empty() && self.role_permissions.is_empty()
    }
}
