//! Compiled glob and regex cache for match definitions.
//!
//! Collection policies are checked on every evaluation, so the same few
//! patterns are matched against many resources. Compiling them once and
//! sharing the result through `Arc` keeps that cost out of the hot path.

use std::sync::Arc;

use dashmap::DashMap;

use super::definition::PatternRule;

/// Most compiled patterns kept; later ones are compiled per use.
pub const DEFAULT_MAX_PATTERNS: usize = 1_000;

/// A pattern ready to test strings.
#[derive(Debug)]
pub enum CompiledPattern {
    Glob(glob::Pattern),
    Regex(regex::Regex),
}

impl CompiledPattern {
    pub fn compile(rule: &PatternRule) -> Result<Self, String> {
        match rule {
            PatternRule::Glob(p) => glob::Pattern::new(p)
                .map(CompiledPattern::Glob)
                .map_err(|e| e.to_string()),
            PatternRule::Regex(p) => regex::Regex::new(p)
                .map(CompiledPattern::Regex)
                .map_err(|e| e.to_string()),
        }
    }

    pub fn is_match(&self, value: &str) -> bool {
        match self {
            CompiledPattern::Glob(p) => p.matches(value),
            CompiledPattern::Regex(re) => re.is_match(value),
        }
    }
}

/// Thread-safe cache of compiled patterns. Failed compiles are not cached.
pub struct PatternCache {
    cache: DashMap<PatternRule, Arc<CompiledPattern>>,
    max_entries: usize,
}

impl std::fmt::Debug for PatternCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternCache")
            .field("max_entries", &self.max_entries)
            .field("entry_count", &self.cache.len())
            .finish()
    }
}

impl PatternCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: DashMap::new(),
            max_entries,
        }
    }

    pub fn get_or_compile(&self, rule: &PatternRule) -> Result<Arc<CompiledPattern>, String> {
        if let Some(cached) = self.cache.get(rule) {
            return Ok(Arc::clone(cached.value()));
        }
        let compiled = Arc::new(CompiledPattern::compile(rule)?);
        if self.cache.len() < self.max_entries {
            self.cache
                .entry(rule.clone())
                .or_insert_with(|| Arc::clone(&compiled));
        }
        Ok(compiled)
    }

    pub fn entry_count(&self) -> usize {
        self.cache.len()
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PATTERNS)
    }
}
