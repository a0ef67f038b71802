//! Server configuration management.
//!
//! Supports loading configuration from:
//! - YAML configuration files
//! - Environment variables (with `BEDROCK_` prefix)
//! - Default values
//!
//! # Configuration Precedence
//!
//! Configuration values are loaded in this order (later overrides earlier):
//! 1. Default values
//! 2. Configuration file (if specified)
//! 3. Environment variables
//!
//! # Environment Variables
//!
//! Environment variables use the `BEDROCK_` prefix with `__` as the nested
//! separator:
//! - `BEDROCK_ENGINE__TIMEOUT_MS=5000`
//! - `BEDROCK_CACHE__ENABLED=true`
//! - `BEDROCK_LOGGING__JSON=true`
//!
//! # Example Configuration File
//!
//! ```yaml
//! engine:
//!   max_hierarchy_depth: 25
//!   max_scope_depth: 32
//!   timeout_ms: 30000
//!
//! cache:
//!   enabled: true
//!   max_capacity: 100000
//!   ttl_secs: 10
//!
//! batch:
//!   max_batch_size: 50
//!   max_concurrency: 16
//!
//! logging:
//!   level: info
//!   json: true
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use bedrock_domain::cache::{DecisionCache, DecisionCacheConfig};
use bedrock_domain::condition::{ConditionCache, ConditionCacheConfig};
use bedrock_domain::EngineConfig;

use crate::handlers::batch::MAX_BATCH_SIZE;

/// Environment variable prefix for Bedrock configuration.
pub const ENV_PREFIX: &str = "BEDROCK";

/// Main server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Evaluation limits.
    pub engine: EngineSettings,

    /// Decision and condition caching.
    pub cache: CacheSettings,

    /// Batch evaluation limits.
    pub batch: BatchSettings,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Evaluation limits passed to the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum hops followed up the resource hierarchy.
    pub max_hierarchy_depth: u32,

    /// Maximum number of scopes in a visible scope chain.
    pub max_scope_depth: u32,

    /// Upper bound on a single evaluation in milliseconds.
    pub timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_hierarchy_depth: 25,
            max_scope_depth: 32,
            timeout_ms: 30_000,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Enable the decision cache. Cached decisions may be stale until their
    /// TTL expires unless the owner invalidates them on writes.
    pub enabled: bool,

    /// Maximum number of cached decisions.
    pub max_capacity: u64,

    /// Decision TTL in seconds.
    pub ttl_secs: u64,

    /// Maximum number of parsed conditions kept. Zero disables the
    /// condition cache.
    pub condition_cache_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_capacity: 100_000,
            ttl_secs: 10,
            condition_cache_entries: 10_000,
        }
    }
}

/// Batch evaluation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Maximum inputs per batch request (at most 50).
    pub max_batch_size: usize,

    /// Maximum evaluations of one batch running at once.
    pub max_concurrency: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            max_concurrency: 16,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is not set
    /// (trace, debug, info, warn, error).
    pub level: String,

    /// Emit JSON lines instead of pretty text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load configuration from a file and environment variables.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Optional path to a YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The specified config file doesn't exist
    /// - The config file has invalid YAML syntax
    /// - Configuration values fail validation
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut builder = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&ServerConfig::default())?);

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigLoadError::FileNotFound {
                    path: path.display().to_string(),
                });
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        // BEDROCK_ENGINE__TIMEOUT_MS -> engine.timeout_ms
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let config: ServerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::load(None)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.engine.max_hierarchy_depth == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "engine.max_hierarchy_depth must be greater than 0".to_string(),
            });
        }

        if self.engine.max_scope_depth == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "engine.max_scope_depth must be greater than 0".to_string(),
            });
        }

        if self.engine.timeout_ms == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "engine.timeout_ms must be greater than 0".to_string(),
            });
        }

        if self.cache.enabled {
            if self.cache.max_capacity == 0 {
                return Err(ConfigLoadError::Invalid {
                    message: "cache.max_capacity must be greater than 0 when caching is enabled"
                        .to_string(),
                });
            }
            if self.cache.ttl_secs == 0 {
                return Err(ConfigLoadError::Invalid {
                    message: "cache.ttl_secs must be greater than 0 when caching is enabled"
                        .to_string(),
                });
            }
        }

        if self.batch.max_batch_size == 0 || self.batch.max_batch_size > MAX_BATCH_SIZE {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "batch.max_batch_size must be between 1 and {}, got {}",
                    MAX_BATCH_SIZE, self.batch.max_batch_size
                ),
            });
        }

        if self.batch.max_concurrency == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "batch.max_concurrency must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {}, got '{}'",
                    valid_levels.join(", "),
                    self.logging.level
                ),
            });
        }

        Ok(())
    }

    /// Build the engine configuration, creating caches as configured.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_max_hierarchy_depth(self.engine.max_hierarchy_depth)
            .with_max_scope_depth(self.engine.max_scope_depth)
            .with_timeout(Duration::from_millis(self.engine.timeout_ms));

        if self.cache.enabled {
            let cache = DecisionCache::new(
                DecisionCacheConfig::default()
                    .with_enabled(true)
                    .with_max_capacity(self.cache.max_capacity)
                    .with_ttl(Duration::from_secs(self.cache.ttl_secs)),
            );
            config = config.with_decision_cache(Arc::new(cache));
        }

        if self.cache.condition_cache_entries > 0 {
            let cache = ConditionCache::new(ConditionCacheConfig {
                max_entries: self.cache.condition_cache_entries,
            });
            config = config.with_condition_cache(Arc::new(cache));
        }

        config
    }
}
