//! Decision caching with TTL and targeted invalidation.
//!
//! The engine itself is stateless; this cache is an optional layer in front
//! of it. It uses Moka's async cache for concurrent access with TTL-based
//! eviction, plus DashMap secondary indices so that invalidating one
//! resource, subject or scope costs O(K) in the affected keys rather than a
//! scan of every entry.
//!
//! # Cache Safety
//!
//! Caching is **disabled** by default. A cached decision can be served after
//! the data behind it changed until the TTL expires or the owner
//! invalidates it. Invalidation is the cache owner's job: the engine never
//! learns about writes.
//!
//! Decisions for requests that carry context are never cached, since the
//! context is part of the question.
//!
//! # Example
//!
//! ```rust,ignore
//! use bedrock_domain::cache::{DecisionCache, DecisionCacheConfig, DecisionKey};
//!
//! let cache = DecisionCache::new(DecisionCacheConfig::default().with_enabled(true));
//! let key = DecisionKey::new("scope-1", "alice", "read").with_resource("document#doc-1");
//! cache.insert(key.clone(), Some("doc-1"), Decision::deny("no grant")).await;
//! cache.invalidate_resource("doc-1").await;
//! assert!(cache.get(&key).await.is_none());
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use moka::notification::RemovalCause;

use crate::model::{Decision, EvaluationInput};

/// Configuration for the decision cache.
#[derive(Debug, Clone)]
pub struct DecisionCacheConfig {
    /// Defaults to `false`; see the module docs.
    pub enabled: bool,
    pub max_capacity: u64,
    pub default_ttl: Duration,
}

impl Default for DecisionCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_capacity: 100_000,
            default_ttl: Duration::from_secs(10),
        }
    }
}

impl DecisionCacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// Identifies one context-free authorization question.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub scope_id: String,
    pub actor: String,
    pub on_behalf_of: Option<String>,
    pub action: String,
    /// Display form of the resource reference, if any. Invalidation works
    /// on resolved ids instead; see [`DecisionCache::insert`].
    pub resource: Option<String>,
}

impl DecisionKey {
    pub fn new(
        scope_id: impl Into<String>,
        actor: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            actor: actor.into(),
            on_behalf_of: None,
            action: action.into(),
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.on_behalf_of = Some(principal.into());
        self
    }

    /// Key for `input`, or `None` when the input carries context.
    pub fn for_input(input: &EvaluationInput) -> Option<Self> {
        if !input.context.is_empty() {
            return None;
        }
        Some(Self {
            scope_id: input.scope_id.clone(),
            actor: input.actor.clone(),
            on_behalf_of: input.on_behalf_of.clone(),
            action: input.action.clone(),
            resource: input.resource.as_ref().map(ToString::to_string),
        })
    }
}

/// A cached decision plus the resolved id it was indexed under.
#[derive(Debug, Clone)]
struct CachedDecision {
    decision: Decision,
    resource_id: Option<String>,
}

type Index = DashMap<String, HashSet<DecisionKey>>;

/// Reverse indices from resource, subject and scope to cache keys.
#[derive(Debug, Default)]
struct Indices {
    by_resource: Index,
    by_subject: Index,
    by_scope: Index,
}

impl Indices {
    fn add(&self, key: &DecisionKey, resource_id: Option<&str>) {
        if let Some(resource_id) = resource_id {
            link(&self.by_resource, resource_id, key);
        }
        for subject in key.subjects() {
            link(&self.by_subject, subject, key);
        }
        link(&self.by_scope, &key.scope_id, key);
    }

    fn remove(&self, key: &DecisionKey, resource_id: Option<&str>) {
        if let Some(resource_id) = resource_id {
            unlink(&self.by_resource, resource_id, key);
        }
        for subject in key.subjects() {
            unlink(&self.by_subject, subject, key);
        }
        unlink(&self.by_scope, &key.scope_id, key);
    }

    fn clear(&self) {
        self.by_resource.clear();
        self.by_subject.clear();
        self.by_scope.clear();
    }
}

fn link(index: &Index, name: &str, key: &DecisionKey) {
    index.entry(name.to_string()).or_default().insert(key.clone());
}

fn unlink(index: &Index, name: &str, key: &DecisionKey) {
    if let Some(mut keys) = index.get_mut(name) {
        keys.remove(key);
    }
    index.remove_if(name, |_, keys| keys.is_empty());
}

impl DecisionKey {
    fn subjects(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.actor.as_str()).chain(self.on_behalf_of.as_deref())
    }
}

/// Decision cache with secondary indices for targeted invalidation.
///
/// Entries are indexed by the resolved resource id, so a resource looked up
/// by id and by external id is invalidated together. Index entries are
/// dropped whenever Moka removes the value, including TTL expiry and
/// capacity eviction.
pub struct DecisionCache {
    cache: Cache<DecisionKey, CachedDecision>,
    config: DecisionCacheConfig,
    indices: Arc<Indices>,
}

impl std::fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionCache")
            .field("config", &self.config)
            .field("entry_count", &self.cache.entry_count())
            .field("resource_index_size", &self.indices.by_resource.len())
            .field("subject_index_size", &self.indices.by_subject.len())
            .field("scope_index_size", &self.indices.by_scope.len())
            .finish()
    }
}

impl DecisionCache {
    pub fn new(config: DecisionCacheConfig) -> Self {
        let indices = Arc::new(Indices::default());
        let listener_indices = Arc::clone(&indices);
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.default_ttl)
            .eviction_listener(
                move |key: Arc<DecisionKey>, value: CachedDecision, cause: RemovalCause| {
                    // A replacement keeps the key alive under the new value.
                    if cause != RemovalCause::Replaced {
                        listener_indices.remove(&key, value.resource_id.as_deref());
                    }
                },
            )
            .build();

        Self {
            cache,
            config,
            indices,
        }
    }

    pub fn config(&self) -> &DecisionCacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Caches `decision`, indexed under the id the request resolved to.
    pub async fn insert(&self, key: DecisionKey, resource_id: Option<&str>, decision: Decision) {
        self.indices.add(&key, resource_id);
        let value = CachedDecision {
            decision,
            resource_id: resource_id.map(str::to_string),
        };
        self.cache.insert(key, value).await;
    }

    pub async fn get(&self, key: &DecisionKey) -> Option<Decision> {
        self.cache.get(key).await.map(|cached| cached.decision)
    }

    pub async fn invalidate(&self, key: &DecisionKey) {
        if let Some(cached) = self.cache.remove(key).await {
            self.indices.remove(key, cached.resource_id.as_deref());
        }
    }

    /// Drop every decision about the resource with internal id `resource_id`,
    /// however the request referred to it.
    pub async fn invalidate_resource(&self, resource_id: &str) {
        if let Some((_, keys)) = self.indices.by_resource.remove(resource_id) {
            self.drop_keys(keys).await;
        }
    }

    /// Drop every decision where `subject_id` acted or was the principal.
    pub async fn invalidate_subject(&self, subject_id: &str) {
        if let Some((_, keys)) = self.indices.by_subject.remove(subject_id) {
            self.drop_keys(keys).await;
        }
    }

    /// Drop every decision evaluated in `scope_id`.
    pub async fn invalidate_scope(&self, scope_id: &str) {
        if let Some((_, keys)) = self.indices.by_scope.remove(scope_id) {
            self.drop_keys(keys).await;
        }
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.indices.clear();
    }

    /// Approximate entry count; call `run_pending_tasks` first for accuracy.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Number of names held by the resource, subject and scope indices.
    pub fn index_sizes(&self) -> (usize, usize, usize) {
        (
            self.indices.by_resource.len(),
            self.indices.by_subject.len(),
            self.indices.by_scope.len(),
        )
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    async fn drop_keys(&self, keys: HashSet<DecisionKey>) {
        for key in &keys {
            self.invalidate(key).await;
        }
    }
}
