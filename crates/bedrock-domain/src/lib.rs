//! bedrock-domain: authorization decision core
//!
//! This crate answers "may this subject perform this action on this
//! resource in this scope?" against an injected, read-only store:
//! - Condition language (JSON expression trees, fail-closed evaluation)
//! - Dynamic collections and their match definitions
//! - Resource hierarchy traversal with cascade edges
//! - Scope/role resolution with three-tier overrides
//! - Resource and collection policies
//! - The decision engine and an optional decision cache
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  bedrock-domain                  │
//! ├─────────────────────────────────────────────────┤
//! │  engine/     - Phase orchestration, timeouts    │
//! │  policy/     - Policy ranking & applicability   │
//! │  hierarchy/  - Cascading ancestor walk          │
//! │  scope/      - Scope chain, overrides, grants   │
//! │  collection/ - Match definitions                │
//! │  condition/  - Expression parser & evaluator    │
//! │  cache/      - Decision caching                 │
//! │  validation/ - Static definition checks         │
//! │  traits      - Store reader seams               │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod collection;
pub mod condition;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod model;
pub mod policy;
pub mod scope;
pub mod traits;
pub mod validation;

// Re-export commonly used types at the crate root
pub use cache::{DecisionCache, DecisionCacheConfig, DecisionKey};
pub use condition::{ConditionContext, ConditionEvaluator};
pub use engine::{DecisionEngine, EngineConfig};
pub use error::{DomainError, DomainResult};
pub use traits::DecisionStore;
