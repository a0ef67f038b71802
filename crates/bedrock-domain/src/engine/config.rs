//! Configuration for the decision engine.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::DecisionCache;
use crate::condition::ConditionCache;

/// Configuration for the decision engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum hops followed up the resource hierarchy.
    pub max_hierarchy_depth: u32,
    /// Maximum number of scopes in a visible scope chain.
    pub max_scope_depth: u32,
    /// Upper bound on a single evaluation.
    pub timeout: Duration,
    /// Optional decision cache.
    ///
    /// When enabled, context-free decisions are served from the cache and
    /// successful results are stored after evaluation. Errors are never
    /// cached.
    pub decision_cache: Option<Arc<DecisionCache>>,
    /// Optional parsed-condition cache shared by every evaluation.
    pub condition_cache: Option<Arc<ConditionCache>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hierarchy_depth: 25,
            max_scope_depth: 32,
            timeout: Duration::from_secs(30),
            decision_cache: None,
            condition_cache: None,
        }
    }
}

impl EngineConfig {
    pub fn with_max_hierarchy_depth(mut self, max_depth: u32) -> Self {
        self.max_hierarchy_depth = max_depth;
        self
    }

    pub fn with_max_scope_depth(mut self, max_depth: u32) -> Self {
        self.max_scope_depth = max_depth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_decision_cache(mut self, cache: Arc<DecisionCache>) -> Self {
        self.decision_cache = Some(cache);
        self
    }

    pub fn with_condition_cache(mut self, cache: Arc<ConditionCache>) -> Self {
        self.condition_cache = Some(cache);
        self
    }
}
