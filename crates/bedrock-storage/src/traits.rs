//! DataStore trait definition and stored record types.
//!
//! Records mirror the authorization data model in storage form: enum-like
//! fields are plain strings checked on write by the `validate_*` helpers, and
//! conditions, match definitions and resource data are opaque JSON.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};

/// Maximum length of any identifier.
pub const MAX_ID_LENGTH: usize = 256;

pub const SCOPE_MODES: &[&str] = &["DEFINE", "MERGE"];
pub const SUBJECT_KINDS: &[&str] = &["user", "service", "agent", "system"];
pub const OVERRIDE_STATES: &[&str] = &["on", "off", "unset"];
pub const LINK_TYPES: &[&str] = &["share", "alias", "mirror"];
pub const CASCADES: &[&str] = &["inherit", "none", "unset"];
pub const EFFECTS: &[&str] = &["allow", "deny"];
pub const POLICY_TARGET_KINDS: &[&str] = &["resource", "collection"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSubject {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredScope {
    pub id: String,
    pub parent_id: Option<String>,
    /// `DEFINE` or `MERGE`.
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMembership {
    pub subject_id: String,
    pub scope_id: String,
    pub role_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRole {
    pub id: String,
    pub scope_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPermission {
    pub id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_pattern: String,
}

/// Role-permission edge, unique per `(role_id, permission_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRolePermission {
    pub role_id: String,
    pub permission_id: String,
    pub condition: Option<Value>,
}

/// Role-permission edge joined with its permission.
#[derive(Debug, Clone, PartialEq)]
pub struct GrantedPermission {
    pub role_id: String,
    pub permission: StoredPermission,
    pub condition: Option<Value>,
}

/// Override of one tier at one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "camelCase")]
pub enum StoredOverride {
    /// Unique per `(scope_id, role_id)`.
    #[serde(rename_all = "camelCase")]
    Role {
        scope_id: String,
        role_id: String,
        state: String,
    },
    /// Unique per `(scope_id, permission_id)`.
    #[serde(rename_all = "camelCase")]
    Permission {
        scope_id: String,
        permission_id: String,
        state: String,
    },
    /// Unique per `(scope_id, role_id, permission_id)`.
    #[serde(rename_all = "camelCase")]
    RolePermission {
        scope_id: String,
        role_id: String,
        permission_id: String,
        state: String,
        condition: Option<Value>,
    },
}

impl StoredOverride {
    pub fn scope_id(&self) -> &str {
        match self {
            StoredOverride::Role { scope_id, .. }
            | StoredOverride::Permission { scope_id, .. }
            | StoredOverride::RolePermission { scope_id, .. } => scope_id,
        }
    }

    pub fn state(&self) -> &str {
        match self {
            StoredOverride::Role { state, .. }
            | StoredOverride::Permission { state, .. }
            | StoredOverride::RolePermission { state, .. } => state,
        }
    }

    /// Whether `other` occupies the same uniqueness slot.
    pub fn same_target(&self, other: &StoredOverride) -> bool {
        match (self, other) {
            (
                StoredOverride::Role { scope_id: s1, role_id: r1, .. },
                StoredOverride::Role { scope_id: s2, role_id: r2, .. },
            ) => s1 == s2 && r1 == r2,
            (
                StoredOverride::Permission { scope_id: s1, permission_id: p1, .. },
                StoredOverride::Permission { scope_id: s2, permission_id: p2, .. },
            ) => s1 == s2 && p1 == p2,
            (
                StoredOverride::RolePermission {
                    scope_id: s1,
                    role_id: r1,
                    permission_id: p1,
                    ..
                },
                StoredOverride::RolePermission {
                    scope_id: s2,
                    role_id: r2,
                    permission_id: p2,
                    ..
                },
            ) => s1 == s2 && r1 == r2 && p1 == p2,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResource {
    pub id: String,
    pub resource_type: String,
    /// Unique per resource type.
    pub external_id: Option<String>,
    pub owner_scope_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredResource {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        owner_scope_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            external_id: None,
            owner_scope_id: owner_scope_id.into(),
            data: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTag {
    pub key: String,
    pub label: String,
}

/// Resource-to-scope link, unique per `(resource_id, scope_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResourceLink {
    pub resource_id: String,
    pub scope_id: String,
    pub link_type: String,
}

/// Parent -> child edge, unique per `(parent_id, child_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredHierarchyEdge {
    pub parent_id: String,
    pub child_id: String,
    pub cascade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCollection {
    pub id: String,
    pub scope_id: String,
    pub resource_type: String,
    pub name: String,
    pub match_definition: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPolicy {
    pub id: String,
    /// `resource` or `collection`.
    pub target_kind: String,
    pub target_id: String,
    pub actions: Vec<String>,
    pub effect: String,
    pub subject_condition: Option<Value>,
    pub context_condition: Option<Value>,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

/// Abstract storage interface for authorization data.
///
/// Implementations must be thread-safe (Send + Sync) and support
/// async operations. Single-record getters return a `*NotFound` error when
/// nothing matches; list operations return an empty list.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    // Subjects

    /// Creates or replaces a subject.
    async fn put_subject(&self, subject: StoredSubject) -> StorageResult<()>;

    async fn get_subject(&self, subject_id: &str) -> StorageResult<StoredSubject>;

    // Scopes and memberships

    /// Creates or replaces a scope. The parent must already exist.
    async fn put_scope(&self, scope: StoredScope) -> StorageResult<()>;

    async fn get_scope(&self, scope_id: &str) -> StorageResult<StoredScope>;

    /// Adds a membership; adding an existing membership is a no-op.
    async fn add_membership(&self, membership: StoredMembership) -> StorageResult<()>;

    async fn remove_membership(&self, membership: &StoredMembership) -> StorageResult<()>;

    /// Memberships of `subject_id` in any of `scope_ids`.
    async fn list_memberships(
        &self,
        subject_id: &str,
        scope_ids: &[String],
    ) -> StorageResult<Vec<StoredMembership>>;

    // Roles and permissions

    async fn put_role(&self, role: StoredRole) -> StorageResult<()>;

    async fn put_permission(&self, permission: StoredPermission) -> StorageResult<()>;

    /// Creates or replaces the edge for `(role_id, permission_id)`.
    async fn put_role_permission(&self, edge: StoredRolePermission) -> StorageResult<()>;

    async fn delete_role_permission(&self, role_id: &str, permission_id: &str)
        -> StorageResult<()>;

    /// Edges of the given roles, joined with their permissions.
    async fn list_role_permissions(&self, role_ids: &[String])
        -> StorageResult<Vec<GrantedPermission>>;

    // Overrides

    /// Creates or replaces the override occupying the same uniqueness slot.
    async fn put_override(&self, entry: StoredOverride) -> StorageResult<()>;

    async fn list_overrides(&self, scope_id: &str) -> StorageResult<Vec<StoredOverride>>;

    // Resources

    /// Creates or replaces a resource. External ids are unique per type.
    async fn put_resource(&self, resource: StoredResource) -> StorageResult<()>;

    async fn get_resource(&self, resource_id: &str) -> StorageResult<StoredResource>;

    async fn get_resource_by_external_id(
        &self,
        resource_type: &str,
        external_id: &str,
    ) -> StorageResult<StoredResource>;

    /// Deletes a resource with its tags, links, edges and direct policies.
    async fn delete_resource(&self, resource_id: &str) -> StorageResult<()>;

    /// Replaces the full tag set of a resource.
    async fn set_resource_tags(&self, resource_id: &str, tags: Vec<StoredTag>)
        -> StorageResult<()>;

    async fn list_resource_tags(&self, resource_id: &str) -> StorageResult<Vec<StoredTag>>;

    async fn add_resource_link(&self, link: StoredResourceLink) -> StorageResult<()>;

    async fn remove_resource_link(&self, resource_id: &str, scope_id: &str) -> StorageResult<()>;

    async fn list_resource_links(&self, resource_id: &str)
        -> StorageResult<Vec<StoredResourceLink>>;

    // Hierarchy

    async fn add_hierarchy_edge(&self, edge: StoredHierarchyEdge) -> StorageResult<()>;

    async fn remove_hierarchy_edge(&self, parent_id: &str, child_id: &str) -> StorageResult<()>;

    async fn list_parent_edges(&self, child_id: &str) -> StorageResult<Vec<StoredHierarchyEdge>>;

    // Collections and policies

    async fn put_collection(&self, collection: StoredCollection) -> StorageResult<()>;

    async fn list_collections(
        &self,
        resource_type: &str,
        scope_id: &str,
    ) -> StorageResult<Vec<StoredCollection>>;

    async fn put_policy(&self, policy: StoredPolicy) -> StorageResult<()>;

    async fn delete_policy(&self, policy_id: &str) -> StorageResult<()>;

    /// Policies whose target is `(target_kind, target_id)`.
    async fn list_policies(&self, target_kind: &str, target_id: &str)
        -> StorageResult<Vec<StoredPolicy>>;
}

// ============================================================
// Validation helpers shared by backends
// ============================================================

fn invalid(message: String) -> StorageError {
    StorageError::InvalidInput { message }
}

/// Identifiers must be non-blank and at most [`MAX_ID_LENGTH`] bytes.
pub fn validate_id(field: &str, value: &str) -> StorageResult<()> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{field} cannot be empty")));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(invalid(format!(
            "{field} exceeds maximum length of {MAX_ID_LENGTH}"
        )));
    }
    Ok(())
}

/// `value` must be one of `allowed`.
pub fn validate_enum(field: &str, value: &str, allowed: &[&str]) -> StorageResult<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!(
            "{field} must be one of {}, got '{value}'",
            allowed.join(", ")
        )))
    }
}

pub fn validate_scope(scope: &StoredScope) -> StorageResult<()> {
    validate_id("scope id", &scope.id)?;
    if let Some(parent) = &scope.parent_id {
        validate_id("parent scope id", parent)?;
        if *parent == scope.id {
            return Err(invalid(format!("scope {} cannot be its own parent", scope.id)));
        }
    }
    validate_enum("scope mode", &scope.mode, SCOPE_MODES)
}

pub fn validate_override(entry: &StoredOverride) -> StorageResult<()> {
    validate_id("override scope id", entry.scope_id())?;
    validate_enum("override state", entry.state(), OVERRIDE_STATES)
}

pub fn validate_edge(edge: &StoredHierarchyEdge) -> StorageResult<()> {
    validate_id("parent id", &edge.parent_id)?;
    validate_id("child id", &edge.child_id)?;
    if edge.parent_id == edge.child_id {
        return Err(invalid(format!(
            "resource {} cannot be its own parent",
            edge.parent_id
        )));
    }
    validate_enum("cascade", &edge.cascade, CASCADES)
}

pub fn validate_policy(policy: &StoredPolicy) -> StorageResult<()> {
    validate_id("policy id", &policy.id)?;
    validate_id("policy target id", &policy.target_id)?;
    validate_enum("policy target kind", &policy.target_kind, POLICY_TARGET_KINDS)?;
    validate_enum("policy effect", &policy.effect, EFFECTS)?;
    if policy.actions.is_empty() {
        return Err(invalid(format!("policy {} has no actions", policy.id)));
    }
    Ok(())
}
