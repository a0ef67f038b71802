//! Parsed condition cache.
//!
//! Conditions are stored as JSON and re-parsed on every evaluation unless a
//! cache is configured. Entries are keyed by the canonical JSON text of the
//! condition, so structurally identical conditions share one tree.
//!
//! # Thread Safety
//!
//! The cache uses DashMap for lock-free concurrent access. Cached trees are
//! immutable and shared through `Arc`.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::expression::Expr;
use super::ConditionResult;

/// Configuration for the condition cache.
#[derive(Debug, Clone)]
pub struct ConditionCacheConfig {
    /// Maximum number of parsed trees kept. New entries are not cached once
    /// the limit is reached; existing entries remain valid.
    pub max_entries: usize,
}

impl Default for ConditionCacheConfig {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

/// Thread-safe cache for parsed condition trees.
///
/// Failed parses are not cached: a malformed condition is re-parsed (and
/// rejected) each time, which keeps the cache free of error state.
///
/// This type intentionally does not implement `Clone`; share it through
/// `Arc<ConditionCache>`.
pub struct ConditionCache {
    cache: DashMap<String, Arc<Expr>>,
    config: ConditionCacheConfig,
}

impl std::fmt::Debug for ConditionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.len())
            .finish()
    }
}

impl ConditionCache {
    /// Creates a new condition cache with the given configuration.
    pub fn new(config: ConditionCacheConfig) -> Self {
        Self {
            cache: DashMap::new(),
            config,
        }
    }

    /// Gets a cached tree or parses and caches it.
    pub fn get_or_parse(&self, condition: &Value) -> ConditionResult<Arc<Expr>> {
        let key = condition.to_string();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let parsed = Arc::new(Expr::parse(condition)?);
        if self.cache.len() >= self.config.max_entries {
            return Ok(parsed);
        }

        // Entry API keeps a single shared Arc per key under concurrent inserts.
        use dashmap::mapref::entry::Entry;
        match self.cache.entry(key) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&parsed));
                Ok(parsed)
            }
        }
    }

    /// Returns the number of cached trees.
    pub fn entry_count(&self) -> usize {
        self.cache.len()
    }

    /// Drops every cached tree.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }
}

impl Default for ConditionCache {
    fn default() -> Self {
        Self::new(ConditionCacheConfig::default())
    }
}
