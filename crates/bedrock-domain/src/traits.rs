//! Store reader traits consumed by the evaluation core.
//!
//! The engine never owns a store: it receives an implementation of these
//! traits at construction and only reads through it. Lookups that find
//! nothing return `Ok(None)` / an empty list; `Err` is reserved for store
//! failures (`DomainError::StoreUnavailable`).

use async_trait::async_trait;

use crate::error::DomainResult;
use crate::model::{
    HierarchyEdge, Membership, Resource, ResourceCollection, ResourcePolicy, ResourceScopeLink,
    ResourceSnapshot, RolePermission, Scope, ScopeOverrides, Subject,
};

/// Subject and membership lookups.
#[async_trait]
pub trait SubjectReader: Send + Sync {
    async fn get_subject(&self, subject_id: &str) -> DomainResult<Option<Subject>>;

    /// Memberships of `subject_id` in any of `scope_ids`.
    async fn get_memberships(
        &self,
        subject_id: &str,
        scope_ids: &[String],
    ) -> DomainResult<Vec<Membership>>;
}

/// Scope tree and per-scope override lookups.
#[async_trait]
pub trait ScopeReader: Send + Sync {
    async fn get_scope(&self, scope_id: &str) -> DomainResult<Option<Scope>>;

    /// All three override tiers defined at `scope_id`.
    async fn get_scope_overrides(&self, scope_id: &str) -> DomainResult<ScopeOverrides>;
}

/// Role grant edges.
#[async_trait]
pub trait RoleReader: Send + Sync {
    /// Every role-permission edge of the given roles, with conditions.
    async fn get_role_permissions_for_roles(
        &self,
        role_ids: &[String],
    ) -> DomainResult<Vec<RolePermission>>;
}

/// Resource lookups.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn get_resource(&self, resource_id: &str) -> DomainResult<Option<Resource>>;

    async fn get_resource_by_external_id(
        &self,
        resource_type: &str,
        external_id: &str,
    ) -> DomainResult<Option<Resource>>;

    /// Field data and tags used for match and condition evaluation.
    async fn get_resource_snapshot(&self, resource_id: &str) -> DomainResult<ResourceSnapshot>;

    async fn get_resource_scope_links(
        &self,
        resource_id: &str,
    ) -> DomainResult<Vec<ResourceScopeLink>>;
}

/// Resource hierarchy edges.
#[async_trait]
pub trait HierarchyReader: Send + Sync {
    /// Edges whose child is `child_id`.
    async fn get_parent_resource_edges(&self, child_id: &str) -> DomainResult<Vec<HierarchyEdge>>;
}

/// Policy lookups.
#[async_trait]
pub trait PolicyReader: Send + Sync {
    async fn get_resource_policies_for_resource(
        &self,
        resource_id: &str,
    ) -> DomainResult<Vec<ResourcePolicy>>;

    async fn get_resource_policies_for_collection(
        &self,
        collection_id: &str,
    ) -> DomainResult<Vec<ResourcePolicy>>;
}

/// Collection lookups.
#[async_trait]
pub trait CollectionReader: Send + Sync {
    async fn get_resource_collections_for_type(
        &self,
        resource_type: &str,
        scope_id: &str,
    ) -> DomainResult<Vec<ResourceCollection>>;
}

/// Everything the decision engine reads.
pub trait DecisionStore:
    SubjectReader
    + ScopeReader
    + RoleReader
    + ResourceReader
    + HierarchyReader
    + PolicyReader
    + CollectionReader
{
}

impl<T> DecisionStore for T where
    T: SubjectReader
        + ScopeReader
        + RoleReader
        + ResourceReader
        + HierarchyReader
        + PolicyReader
        + CollectionReader
{
}
