//! Storage error types.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Subject not found.
    #[error("subject not found: {subject_id}")]
    SubjectNotFound { subject_id: String },

    /// Scope not found.
    #[error("scope not found: {scope_id}")]
    ScopeNotFound { scope_id: String },

    /// Role not found.
    #[error("role not found: {role_id}")]
    RoleNotFound { role_id: String },

    /// Permission not found.
    #[error("permission not found: {permission_id}")]
    PermissionNotFound { permission_id: String },

    /// Resource not found.
    #[error("resource not found: {resource_id}")]
    ResourceNotFound { resource_id: String },

    /// Collection not found.
    #[error("collection not found: {collection_id}")]
    CollectionNotFound { collection_id: String },

    /// Policy not found.
    #[error("policy not found: {policy_id}")]
    PolicyNotFound { policy_id: String },

    /// Another resource of the same type already uses this external id.
    #[error("external id already in use: {resource_type}:{external_id}")]
    DuplicateExternalId {
        resource_type: String,
        external_id: String,
    },

    /// The resource is already linked to the scope.
    #[error("resource {resource_id} is already linked to scope {scope_id}")]
    DuplicateLink {
        resource_id: String,
        scope_id: String,
    },

    /// The hierarchy edge already exists.
    #[error("hierarchy edge already exists: {parent_id} -> {child_id}")]
    DuplicateEdge { parent_id: String, child_id: String },

    /// Backend connection error.
    #[error("storage connection error: {message}")]
    ConnectionError { message: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Serialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// Internal error.
    #[error("internal storage error: {message}")]
    InternalError { message: String },
}

impl StorageError {
    /// Returns true for lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::SubjectNotFound { .. }
                | StorageError::ScopeNotFound { .. }
                | StorageError::RoleNotFound { .. }
                | StorageError::PermissionNotFound { .. }
                | StorageError::ResourceNotFound { .. }
                | StorageError::CollectionNotFound { .. }
                | StorageError::PolicyNotFound { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
