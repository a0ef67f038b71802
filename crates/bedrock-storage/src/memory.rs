//! In-memory storage implementation for testing and embedding.
//!
//! Every table is a `DashMap` keyed for the lookups the engine performs
//! (memberships by subject, edges by child, links by resource). Uniqueness
//! of external ids is enforced through a secondary index updated with the
//! entry API so concurrent writers cannot both claim the same id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{instrument, warn};

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    validate_edge, validate_enum, validate_id, validate_override, validate_policy,
    validate_scope, DataStore, GrantedPermission, StoredCollection, StoredHierarchyEdge,
    StoredMembership, StoredOverride, StoredPermission, StoredPolicy, StoredResource,
    StoredResourceLink, StoredRole, StoredRolePermission, StoredScope, StoredSubject, StoredTag,
    LINK_TYPES, SUBJECT_KINDS,
};

/// In-memory implementation of [`DataStore`].
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    subjects: DashMap<String, StoredSubject>,
    scopes: DashMap<String, StoredScope>,
    /// subject_id -> memberships
    memberships: DashMap<String, HashSet<StoredMembership>>,
    roles: DashMap<String, StoredRole>,
    permissions: DashMap<String, StoredPermission>,
    /// role_id -> permission_id -> edge
    role_permissions: DashMap<String, HashMap<String, StoredRolePermission>>,
    /// scope_id -> overrides defined at that scope
    overrides: DashMap<String, Vec<StoredOverride>>,
    resources: DashMap<String, StoredResource>,
    /// (resource_type, external_id) -> resource_id
    external_ids: DashMap<(String, String), String>,
    tags: DashMap<String, Vec<StoredTag>>,
    /// resource_id -> links
    links: DashMap<String, Vec<StoredResourceLink>>,
    /// child_id -> edges to its parents
    parent_edges: DashMap<String, Vec<StoredHierarchyEdge>>,
    collections: DashMap<String, StoredCollection>,
    policies: DashMap<String, StoredPolicy>,
}

impl MemoryDataStore {
    /// Creates a new in-memory data store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory data store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn require_scope(&self, scope_id: &str) -> StorageResult<()> {
        if self.scopes.contains_key(scope_id) {
            Ok(())
        } else {
            Err(StorageError::ScopeNotFound {
                scope_id: scope_id.to_string(),
            })
        }
    }

    fn require_resource(&self, resource_id: &str) -> StorageResult<()> {
        if self.resources.contains_key(resource_id) {
            Ok(())
        } else {
            Err(StorageError::ResourceNotFound {
                resource_id: resource_id.to_string(),
            })
        }
    }

    /// Claim `(type, external_id)` for `resource_id`.
    fn claim_external_id(&self, resource: &StoredResource) -> StorageResult<()> {
        let Some(external_id) = &resource.external_id else {
            return Ok(());
        };
        match self
            .external_ids
            .entry((resource.resource_type.clone(), external_id.clone()))
        {
            Entry::Occupied(owner) if owner.get() != &resource.id => {
                Err(StorageError::DuplicateExternalId {
                    resource_type: resource.resource_type.clone(),
                    external_id: external_id.clone(),
                })
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(resource.id.clone());
                Ok(())
            }
        }
    }

    fn release_external_id(&self, resource: &StoredResource) {
        if let Some(external_id) = &resource.external_id {
            self.external_ids
                .remove_if(&(resource.resource_type.clone(), external_id.clone()), |_, id| {
                    *id == resource.id
                });
        }
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn put_subject(&self, subject: StoredSubject) -> StorageResult<()> {
        validate_id("subject id", &subject.id)?;
        validate_enum("subject kind", &subject.kind, SUBJECT_KINDS)?;
        self.subjects.insert(subject.id.clone(), subject);
        Ok(())
    }

    async fn get_subject(&self, subject_id: &str) -> StorageResult<StoredSubject> {
        self.subjects
            .get(subject_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StorageError::SubjectNotFound {
                subject_id: subject_id.to_string(),
            })
    }

    #[instrument(skip(self, scope), fields(scope_id = %scope.id))]
    async fn put_scope(&self, scope: StoredScope) -> StorageResult<()> {
        validate_scope(&scope)?;
        if let Some(parent) = &scope.parent_id {
            self.require_scope(parent)?;
        }
        self.scopes.insert(scope.id.clone(), scope);
        Ok(())
    }

    async fn get_scope(&self, scope_id: &str) -> StorageResult<StoredScope> {
        self.scopes
            .get(scope_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StorageError::ScopeNotFound {
                scope_id: scope_id.to_string(),
            })
    }

    async fn add_membership(&self, membership: StoredMembership) -> StorageResult<()> {
        if !self.subjects.contains_key(&membership.subject_id) {
            return Err(StorageError::SubjectNotFound {
                subject_id: membership.subject_id,
            });
        }
        self.require_scope(&membership.scope_id)?;
        if !self.roles.contains_key(&membership.role_id) {
            return Err(StorageError::RoleNotFound {
                role_id: membership.role_id,
            });
        }
        self.memberships
            .entry(membership.subject_id.clone())
            .or_default()
            .insert(membership);
        Ok(())
    }

    async fn remove_membership(&self, membership: &StoredMembership) -> StorageResult<()> {
        if let Some(mut held) = self.memberships.get_mut(&membership.subject_id) {
            held.remove(membership);
        }
        Ok(())
    }

    async fn list_memberships(
        &self,
        subject_id: &str,
        scope_ids: &[String],
    ) -> StorageResult<Vec<StoredMembership>> {
        Ok(self
            .memberships
            .get(subject_id)
            .map(|held| {
                held.iter()
                    .filter(|m| scope_ids.contains(&m.scope_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn put_role(&self, role: StoredRole) -> StorageResult<()> {
        validate_id("role id", &role.id)?;
        self.require_scope(&role.scope_id)?;
        self.roles.insert(role.id.clone(), role);
        Ok(())
    }

    async fn put_permission(&self, permission: StoredPermission) -> StorageResult<()> {
        validate_id("permission id", &permission.id)?;
        validate_id("permission action", &permission.action)?;
        validate_id("permission resource type", &permission.resource_type)?;
        validate_id("permission resource pattern", &permission.resource_pattern)?;
        self.permissions.insert(permission.id.clone(), permission);
        Ok(())
    }

    async fn put_role_permission(&self, edge: StoredRolePermission) -> StorageResult<()> {
        if !self.roles.contains_key(&edge.role_id) {
            return Err(StorageError::RoleNotFound {
                role_id: edge.role_id,
            });
        }
        if !self.permissions.contains_key(&edge.permission_id) {
            return Err(StorageError::PermissionNotFound {
                permission_id: edge.permission_id,
            });
        }
        self.role_permissions
            .entry(edge.role_id.clone())
            .or_default()
            .insert(edge.permission_id.clone(), edge);
        Ok(())
    }

    async fn delete_role_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> StorageResult<()> {
        if let Some(mut edges) = self.role_permissions.get_mut(role_id) {
            edges.remove(permission_id);
        }
        Ok(())
    }

    async fn list_role_permissions(
        &self,
        role_ids: &[String],
    ) -> StorageResult<Vec<GrantedPermission>> {
        let mut granted = Vec::new();
        for role_id in role_ids {
            let Some(edges) = self.role_permissions.get(role_id) else {
                continue;
            };
            for edge in edges.values() {
                let Some(permission) = self.permissions.get(&edge.permission_id) else {
                    warn!(role_id = %role_id, permission_id = %edge.permission_id, "edge to missing permission");
                    continue;
                };
                granted.push(GrantedPermission {
                    role_id: role_id.clone(),
                    permission: permission.value().clone(),
                    condition: edge.condition.clone(),
                });
            }
        }
        Ok(granted)
    }

    async fn put_override(&self, entry: StoredOverride) -> StorageResult<()> {
        validate_override(&entry)?;
        self.require_scope(entry.scope_id())?;
        let mut entries = self.overrides.entry(entry.scope_id().to_string()).or_default();
        entries.retain(|existing| !existing.same_target(&entry));
        entries.push(entry);
        Ok(())
    }

    async fn list_overrides(&self, scope_id: &str) -> StorageResult<Vec<StoredOverride>> {
        Ok(self
            .overrides
            .get(scope_id)
            .map(|o| o.value().clone())
            .unwrap_or_default())
    }

    #[instrument(skip(self, resource), fields(resource_id = %resource.id))]
    async fn put_resource(&self, resource: StoredResource) -> StorageResult<()> {
        validate_id("resource id", &resource.id)?;
        validate_id("resource type", &resource.resource_type)?;
        if let Some(external_id) = &resource.external_id {
            validate_id("external id", external_id)?;
        }
        self.require_scope(&resource.owner_scope_id)?;

        self.claim_external_id(&resource)?;
        if let Some(previous) = self.resources.insert(resource.id.clone(), resource.clone()) {
            if previous.external_id != resource.external_id
                || previous.resource_type != resource.resource_type
            {
                self.release_external_id(&previous);
            }
        }
        Ok(())
    }

    async fn get_resource(&self, resource_id: &str) -> StorageResult<StoredResource> {
        self.resources
            .get(resource_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StorageError::ResourceNotFound {
                resource_id: resource_id.to_string(),
            })
    }

    async fn get_resource_by_external_id(
        &self,
        resource_type: &str,
        external_id: &str,
    ) -> StorageResult<StoredResource> {
        let resource_id = self
            .external_ids
            .get(&(resource_type.to_string(), external_id.to_string()))
            .map(|id| id.value().clone())
            .ok_or_else(|| StorageError::ResourceNotFound {
                resource_id: format!("{resource_type}:{external_id}"),
            })?;
        self.get_resource(&resource_id).await
    }

    #[instrument(skip(self))]
    async fn delete_resource(&self, resource_id: &str) -> StorageResult<()> {
        let (_, resource) =
            self.resources
                .remove(resource_id)
                .ok_or_else(|| StorageError::ResourceNotFound {
                    resource_id: resource_id.to_string(),
                })?;
        self.release_external_id(&resource);
        self.tags.remove(resource_id);
        self.links.remove(resource_id);
        self.parent_edges.remove(resource_id);
        for mut edges in self.parent_edges.iter_mut() {
            edges.retain(|e| e.parent_id != resource_id);
        }
        self.policies
            .retain(|_, p| !(p.target_kind == "resource" && p.target_id == resource_id));
        Ok(())
    }

    async fn set_resource_tags(
        &self,
        resource_id: &str,
        tags: Vec<StoredTag>,
    ) -> StorageResult<()> {
        self.require_resource(resource_id)?;
        for tag in &tags {
            validate_id("tag key", &tag.key)?;
        }
        self.tags.insert(resource_id.to_string(), tags);
        Ok(())
    }

    async fn list_resource_tags(&self, resource_id: &str) -> StorageResult<Vec<StoredTag>> {
        Ok(self
            .tags
            .get(resource_id)
            .map(|t| t.value().clone())
            .unwrap_or_default())
    }

    async fn add_resource_link(&self, link: StoredResourceLink) -> StorageResult<()> {
        validate_enum("link type", &link.link_type, LINK_TYPES)?;
        self.require_resource(&link.resource_id)?;
        self.require_scope(&link.scope_id)?;

        let mut links = self.links.entry(link.resource_id.clone()).or_default();
        if links.iter().any(|l| l.scope_id == link.scope_id) {
            return Err(StorageError::DuplicateLink {
                resource_id: link.resource_id,
                scope_id: link.scope_id,
            });
        }
        links.push(link);
        Ok(())
    }

    async fn remove_resource_link(&self, resource_id: &str, scope_id: &str) -> StorageResult<()> {
        if let Some(mut links) = self.links.get_mut(resource_id) {
            links.retain(|l| l.scope_id != scope_id);
        }
        Ok(())
    }

    async fn list_resource_links(
        &self,
        resource_id: &str,
    ) -> StorageResult<Vec<StoredResourceLink>> {
        Ok(self
            .links
            .get(resource_id)
            .map(|l| l.value().clone())
            .unwrap_or_default())
    }

    async fn add_hierarchy_edge(&self, edge: StoredHierarchyEdge) -> StorageResult<()> {
        validate_edge(&edge)?;
        self.require_resource(&edge.parent_id)?;
        self.require_resource(&edge.child_id)?;

        let mut edges = self.parent_edges.entry(edge.child_id.clone()).or_default();
        if edges.iter().any(|e| e.parent_id == edge.parent_id) {
            return Err(StorageError::DuplicateEdge {
                parent_id: edge.parent_id,
                child_id: edge.child_id,
            });
        }
        edges.push(edge);
        Ok(())
    }

    async fn remove_hierarchy_edge(&self, parent_id: &str, child_id: &str) -> StorageResult<()> {
        if let Some(mut edges) = self.parent_edges.get_mut(child_id) {
            edges.retain(|e| e.parent_id != parent_id);
        }
        Ok(())
    }

    async fn list_parent_edges(&self, child_id: &str) -> StorageResult<Vec<StoredHierarchyEdge>> {
        Ok(self
            .parent_edges
            .get(child_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn put_collection(&self, collection: StoredCollection) -> StorageResult<()> {
        validate_id("collection id", &collection.id)?;
        validate_id("collection resource type", &collection.resource_type)?;
        self.require_scope(&collection.scope_id)?;
        self.collections.insert(collection.id.clone(), collection);
        Ok(())
    }

    async fn list_collections(
        &self,
        resource_type: &str,
        scope_id: &str,
    ) -> StorageResult<Vec<StoredCollection>> {
        Ok(self
            .collections
            .iter()
            .filter(|c| c.resource_type == resource_type && c.scope_id == scope_id)
            .map(|c| c.value().clone())
            .collect())
    }

    async fn put_policy(&self, policy: StoredPolicy) -> StorageResult<()> {
        validate_policy(&policy)?;
        match policy.target_kind.as_str() {
            "resource" => self.require_resource(&policy.target_id)?,
            _ if !self.collections.contains_key(&policy.target_id) => {
                return Err(StorageError::CollectionNotFound {
                    collection_id: policy.target_id,
                });
            }
            _ => {}
        }
        self.policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    async fn delete_policy(&self, policy_id: &str) -> StorageResult<()> {
        self.policies
            .remove(policy_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::PolicyNotFound {
                policy_id: policy_id.to_string(),
            })
    }

    async fn list_policies(
        &self,
        target_kind: &str,
        target_id: &str,
    ) -> StorageResult<Vec<StoredPolicy>> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.target_kind == target_kind && p.target_id == target_id)
            .map(|p| p.value().clone())
            .collect())
    }
}
