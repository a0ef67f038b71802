//! Validated writes of evaluation-time definitions.
//!
//! The engine fails closed on bad definitions: a condition that does not
//! parse is `false`, a malformed match definition matches nothing, and so
//! on. `DefinitionWriter` rejects such data before it reaches storage so
//! that an operator sees an error instead of silently inert rules.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use bedrock_domain::model::Permission;
use bedrock_domain::validation::{
    validate_condition, validate_match_definition, validate_permission, validate_policy,
    ValidationError,
};
use bedrock_storage::{
    DataStore, StorageError, StoredCollection, StoredOverride, StoredPermission, StoredPolicy,
    StoredRolePermission,
};

use crate::adapters::to_policy;

/// Errors from a definition write.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The definition failed validation and was not stored.
    #[error("invalid definition: {}", join(.0))]
    Invalid(Vec<ValidationError>),

    /// The store refused or failed the write.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ValidationError> for DefinitionError {
    fn from(error: ValidationError) -> Self {
        DefinitionError::Invalid(vec![error])
    }
}

pub type DefinitionResult<T> = Result<T, DefinitionError>;

/// Writes permissions, grant edges, overrides, collections and policies
/// after checking them.
pub struct DefinitionWriter<S: DataStore> {
    storage: Arc<S>,
}

impl<S: DataStore> DefinitionWriter<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    #[instrument(skip(self, permission), fields(permission_id = %permission.id))]
    pub async fn put_permission(&self, permission: StoredPermission) -> DefinitionResult<()> {
        validate_permission(&Permission::new(
            permission.id.as_str(),
            permission.action.as_str(),
            permission.resource_type.as_str(),
            permission.resource_pattern.as_str(),
        ))
        .map_err(|e| {
            debug!(error = %e, "permission rejected");
            e
        })?;
        self.storage.put_permission(permission).await?;
        Ok(())
    }

    #[instrument(skip(self, edge), fields(role_id = %edge.role_id, permission_id = %edge.permission_id))]
    pub async fn put_role_permission(&self, edge: StoredRolePermission) -> DefinitionResult<()> {
        if let Some(condition) = &edge.condition {
            validate_condition(condition, "role permission")?;
        }
        self.storage.put_role_permission(edge).await?;
        Ok(())
    }

    #[instrument(skip(self, entry), fields(scope_id = %entry.scope_id()))]
    pub async fn put_override(&self, entry: StoredOverride) -> DefinitionResult<()> {
        if let StoredOverride::RolePermission {
            condition: Some(condition),
            ..
        } = &entry
        {
            validate_condition(condition, "role permission override")?;
        }
        self.storage.put_override(entry).await?;
        Ok(())
    }

    #[instrument(skip(self, collection), fields(collection_id = %collection.id))]
    pub async fn put_collection(&self, collection: StoredCollection) -> DefinitionResult<()> {
        validate_match_definition(&collection.match_definition)
            .map_err(DefinitionError::Invalid)?;
        self.storage.put_collection(collection).await?;
        Ok(())
    }

    #[instrument(skip(self, policy), fields(policy_id = %policy.id))]
    pub async fn put_policy(&self, policy: StoredPolicy) -> DefinitionResult<()> {
        // Unknown target kinds and effects are left to the store to reject.
        if let Ok(domain) = to_policy(policy.clone()) {
            validate_policy(&domain).map_err(DefinitionError::Invalid)?;
        }
        self.storage.put_policy(policy).await?;
        Ok(())
    }
}
