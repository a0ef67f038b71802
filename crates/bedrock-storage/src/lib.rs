//! bedrock-storage: Storage abstraction layer
//!
//! This crate provides the persistence contract for Bedrock, including:
//! - DataStore trait for reads and writes of authorization data
//! - Stored record types and write-side validation helpers
//! - In-memory implementation enforcing the uniqueness invariants
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              bedrock-storage                 │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs   - DataStore trait & records    │
//! │  memory.rs   - In-memory implementation     │
//! │  error.rs    - StorageError                 │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryDataStore;
pub use traits::{
    DataStore, GrantedPermission, StoredCollection, StoredHierarchyEdge, StoredMembership,
    StoredOverride, StoredPermission, StoredPolicy, StoredResource, StoredResourceLink,
    StoredRole, StoredRolePermission, StoredScope, StoredSubject, StoredTag,
};
