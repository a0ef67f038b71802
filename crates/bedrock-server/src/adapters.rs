//! Adapters that bridge the storage layer to the domain layer.
//!
//! The domain layer (bedrock-domain) reads through the traits in
//! `bedrock_domain::traits`. The storage layer (bedrock-storage) implements
//! `DataStore` with string-typed records. `DataStoreAdapter` implements every
//! domain reader on top of a `DataStore`:
//! - `*NotFound` storage errors become `Ok(None)` (or an empty snapshot)
//! - any other storage error becomes `DomainError::StoreUnavailable`
//! - a stored enum value the domain does not know is reported as
//!   `CorruptData` rather than guessed at

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use bedrock_domain::error::{DomainError, DomainResult};
use bedrock_domain::model::{
    Cascade, Effect, HierarchyEdge, LinkType, Membership, OverrideState, Permission,
    PermissionOverride, PolicyTarget, Resource, ResourceCollection, ResourcePolicy,
    ResourceScopeLink, ResourceSnapshot, ResourceTag, RoleOverride, RolePermission,
    RolePermissionOverride, Scope, ScopeMode, ScopeOverrides, Subject, SubjectKind,
};
use bedrock_domain::traits::{
    CollectionReader, HierarchyReader, PolicyReader, ResourceReader, RoleReader, ScopeReader,
    SubjectReader,
};
use bedrock_storage::{
    DataStore, GrantedPermission, StorageError, StoredCollection, StoredHierarchyEdge,
    StoredOverride, StoredPolicy, StoredResource, StoredResourceLink, StoredScope,
    StoredSubject,
};

/// Implements the domain reader traits on top of a `DataStore`.
pub struct DataStoreAdapter<S: DataStore> {
    storage: Arc<S>,
}

impl<S: DataStore> DataStoreAdapter<S> {
    /// Creates a new adapter wrapping the given storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// The wrapped storage, for writers sharing the same backend.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}

fn unavailable(err: StorageError) -> DomainError {
    DomainError::StoreUnavailable {
        message: format!("storage error: {}", err),
    }
}

fn optional<T>(result: Result<T, StorageError>) -> DomainResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(unavailable(e)),
    }
}

fn corrupt(what: &str, value: &str) -> DomainError {
    DomainError::CorruptData {
        message: format!("stored {} has unknown value '{}'", what, value),
    }
}

// ============================================================
// Record conversions
// ============================================================

fn scope_mode(value: &str) -> DomainResult<ScopeMode> {
    match value {
        "DEFINE" => Ok(ScopeMode::Define),
        "MERGE" => Ok(ScopeMode::Merge),
        other => Err(corrupt("scope mode", other)),
    }
}

fn subject_kind(value: &str) -> DomainResult<SubjectKind> {
    match value {
        "user" => Ok(SubjectKind::User),
        "service" => Ok(SubjectKind::Service),
        "agent" => Ok(SubjectKind::Agent),
        "system" => Ok(SubjectKind::System),
        other => Err(corrupt("subject kind", other)),
    }
}

fn override_state(value: &str) -> DomainResult<OverrideState> {
    match value {
        "on" => Ok(OverrideState::On),
        "off" => Ok(OverrideState::Off),
        "unset" => Ok(OverrideState::Unset),
        other => Err(corrupt("override state", other)),
    }
}

fn link_type(value: &str) -> DomainResult<LinkType> {
    match value {
        "share" => Ok(LinkType::Share),
        "alias" => Ok(LinkType::Alias),
        "mirror" => Ok(LinkType::Mirror),
        other => Err(corrupt("link type", other)),
    }
}

fn cascade(value: &str) -> DomainResult<Cascade> {
    match value {
        "inherit" => Ok(Cascade::Inherit),
        "none" => Ok(Cascade::None),
        "unset" => Ok(Cascade::Unset),
        other => Err(corrupt("cascade", other)),
    }
}

fn effect(value: &str) -> DomainResult<Effect> {
    match value {
        "allow" => Ok(Effect::Allow),
        "deny" => Ok(Effect::Deny),
        other => Err(corrupt("policy effect", other)),
    }
}

fn to_subject(stored: StoredSubject) -> DomainResult<Subject> {
    Ok(Subject {
        kind: subject_kind(&stored.kind)?,
        id: stored.id,
        attributes: stored.attributes.into_iter().collect(),
    })
}

fn to_scope(stored: StoredScope) -> DomainResult<Scope> {
    Ok(Scope {
        mode: scope_mode(&stored.mode)?,
        id: stored.id,
        parent_id: stored.parent_id,
    })
}

fn to_resource(stored: StoredResource) -> Resource {
    Resource {
        id: stored.id,
        resource_type: stored.resource_type,
        external_id: stored.external_id,
        owner_scope_id: stored.owner_scope_id,
        created_at: stored.created_at,
        updated_at: stored.updated_at,
    }
}

fn to_role_permission(granted: GrantedPermission) -> RolePermission {
    let p = granted.permission;
    RolePermission {
        role_id: granted.role_id,
        permission: Permission::new(p.id, p.action, p.resource_type, p.resource_pattern),
        condition: granted.condition,
    }
}

fn to_link(stored: StoredResourceLink) -> DomainResult<ResourceScopeLink> {
    Ok(ResourceScopeLink {
        link_type: link_type(&stored.link_type)?,
        resource_id: stored.resource_id,
        scope_id: stored.scope_id,
    })
}

fn to_edge(stored: StoredHierarchyEdge) -> DomainResult<HierarchyEdge> {
    Ok(HierarchyEdge::new(
        stored.parent_id,
        stored.child_id,
        cascade(&stored.cascade)?,
    ))
}

fn to_collection(stored: StoredCollection) -> ResourceCollection {
    ResourceCollection {
        id: stored.id,
        scope_id: stored.scope_id,
        resource_type: stored.resource_type,
        name: stored.name,
        match_definition: stored.match_definition,
    }
}

pub(crate) fn to_policy(stored: StoredPolicy) -> DomainResult<ResourcePolicy> {
    let target = match stored.target_kind.as_str() {
        "resource" => PolicyTarget::Resource(stored.target_id),
        "collection" => PolicyTarget::Collection(stored.target_id),
        other => return Err(corrupt("policy target kind", other)),
    };
    Ok(ResourcePolicy {
        effect: effect(&stored.effect)?,
        id: stored.id,
        target,
        actions: stored.actions,
        subject_condition: stored.subject_condition,
        context_condition: stored.context_condition,
        priority: stored.priority,
        created_at: stored.created_at,
    })
}

fn to_overrides(entries: Vec<StoredOverride>) -> DomainResult<ScopeOverrides> {
    let mut overrides = ScopeOverrides::default();
    for entry in entries {
        match entry {
            StoredOverride::Role {
                scope_id,
                role_id,
                state,
            } => overrides.roles.push(RoleOverride {
                scope_id,
                role_id,
                state: override_state(&state)?,
            }),
            StoredOverride::Permission {
                scope_id,
                permission_id,
                state,
            } => overrides.permissions.push(PermissionOverride {
                scope_id,
                permission_id,
                state: override_state(&state)?,
            }),
            StoredOverride::RolePermission {
                scope_id,
                role_id,
                permission_id,
                state,
                condition,
            } => overrides.role_permissions.push(RolePermissionOverride {
                scope_id,
                role_id,
                permission_id,
                state: override_state(&state)?,
                condition,
            }),
        }
    }
    Ok(overrides)
}

fn collect<T, U>(
    records: Vec<T>,
    convert: impl Fn(T) -> DomainResult<U>,
) -> DomainResult<Vec<U>> {
    records.into_iter().map(convert).collect()
}

// ============================================================
// Domain reader implementations
// ============================================================

#[async_trait]
impl<S: DataStore> SubjectReader for DataStoreAdapter<S> {
    #[instrument(skip(self))]
    async fn get_subject(&self, subject_id: &str) -> DomainResult<Option<Subject>> {
        optional(self.storage.get_subject(subject_id).await)?
            .map(to_subject)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_memberships(
        &self,
        subject_id: &str,
        scope_ids: &[String],
    ) -> DomainResult<Vec<Membership>> {
        let memberships = self
            .storage
            .list_memberships(subject_id, scope_ids)
            .await
            .map_err(unavailable)?;
        Ok(memberships
            .into_iter()
            .map(|m| Membership {
                subject_id: m.subject_id,
                scope_id: m.scope_id,
                role_id: m.role_id,
            })
            .collect())
    }
}

#[async_trait]
impl<S: DataStore> ScopeReader for DataStoreAdapter<S> {
    #[instrument(skip(self))]
    async fn get_scope(&self, scope_id: &str) -> DomainResult<Option<Scope>> {
        optional(self.storage.get_scope(scope_id).await)?
            .map(to_scope)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_scope_overrides(&self, scope_id: &str) -> DomainResult<ScopeOverrides> {
        let entries = self
            .storage
            .list_overrides(scope_id)
            .await
            .map_err(unavailable)?;
        to_overrides(entries)
    }
}

#[async_trait]
impl<S: DataStore> RoleReader for DataStoreAdapter<S> {
    #[instrument(skip(self))]
    async fn get_role_permissions_for_roles(
        &self,
        role_ids: &[String],
    ) -> DomainResult<Vec<RolePermission>> {
        let granted = self
            .storage
            .list_role_permissions(role_ids)
            .await
            .map_err(unavailable)?;
        Ok(granted.into_iter().map(to_role_permission).collect())
    }
}

#[async_trait]
impl<S: DataStore> ResourceReader for DataStoreAdapter<S> {
    #[instrument(skip(self))]
    async fn get_resource(&self, resource_id: &str) -> DomainResult<Option<Resource>> {
        Ok(optional(self.storage.get_resource(resource_id).await)?.map(to_resource))
    }

    #[instrument(skip(self))]
    async fn get_resource_by_external_id(
        &self,
        resource_type: &str,
        external_id: &str,
    ) -> DomainResult<Option<Resource>> {
        let found = self
            .storage
            .get_resource_by_external_id(resource_type, external_id)
            .await;
        Ok(optional(found)?.map(to_resource))
    }

    #[instrument(skip(self))]
    async fn get_resource_snapshot(&self, resource_id: &str) -> DomainResult<ResourceSnapshot> {
        let (resource, tags) = futures::join!(
            self.storage.get_resource(resource_id),
            self.storage.list_resource_tags(resource_id),
        );
        let Some(resource) = optional(resource)? else {
            return Ok(ResourceSnapshot::default());
        };
        let tags = tags.map_err(unavailable)?;
        Ok(ResourceSnapshot {
            data: resource.data,
            tags: tags
                .into_iter()
                .map(|t| ResourceTag::new(t.key, t.label))
                .collect(),
        })
    }

    #[instrument(skip(self))]
    async fn get_resource_scope_links(
        &self,
        resource_id: &str,
    ) -> DomainResult<Vec<ResourceScopeLink>> {
        let links = self
            .storage
            .list_resource_links(resource_id)
            .await
            .map_err(unavailable)?;
        collect(links, to_link)
    }
}

#[async_trait]
impl<S: DataStore> HierarchyReader for DataStoreAdapter<S> {
    #[instrument(skip(self))]
    async fn get_parent_resource_edges(&self, child_id: &str) -> DomainResult<Vec<HierarchyEdge>> {
        let edges = self
            .storage
            .list_parent_edges(child_id)
            .await
            .map_err(unavailable)?;
        collect(edges, to_edge)
    }
}

#[async_trait]
impl<S: DataStore> PolicyReader for DataStoreAdapter<S> {
    #[instrument(skip(self))]
    async fn get_resource_policies_for_resource(
        &self,
        resource_id: &str,
    ) -> DomainResult<Vec<ResourcePolicy>> {
        let policies = self
            .storage
            .list_policies("resource", resource_id)
            .await
            .map_err(unavailable)?;
        collect(policies, to_policy)
    }

    #[instrument(skip(self))]
    async fn get_resource_policies_for_collection(
        &self,
        collection_id: &str,
    ) -> DomainResult<Vec<ResourcePolicy>> {
        let policies = self
            .storage
            .list_policies("collection", collection_id)
            .await
            .map_err(unavailable)?;
        collect(policies, to_policy)
    }
}

#[async_trait]
impl<S: DataStore> CollectionReader for DataStoreAdapter<S> {
    #[instrument(skip(self))]
    async fn get_resource_collections_for_type(
        &self,
        resource_type: &str,
        scope_id: &str,
    ) -> DomainResult<Vec<ResourceCollection>> {
        let collections = self
            .storage
            .list_collections(resource_type, scope_id)
            .await
            .map_err(unavailable)?;
        Ok(collections.into_iter().map(to_collection).collect())
    }
}
