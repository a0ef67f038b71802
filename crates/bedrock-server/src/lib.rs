//! bedrock-server: service layer around the decision engine
//!
//! This crate wires storage to the evaluation core:
//! - Configuration management (defaults, YAML file, `BEDROCK_` env vars)
//! - Logging initialisation
//! - Adapters from `DataStore` to the domain reader traits
//! - Single and batch evaluation handlers
//! - Validated definition writes
//!
//! There is no network listener; embedders call the handlers directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               bedrock-server                 │
//! ├─────────────────────────────────────────────┤
//! │  config.rs      - Configuration management  │
//! │  observability/ - Logging                   │
//! │  adapters.rs    - DataStore -> readers      │
//! │  handlers/      - Request handlers          │
//! │    evaluate.rs  - Single evaluation         │
//! │    batch/       - Batch evaluation          │
//! │    definitions  - Validated writes          │
//! └─────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod observability;

use std::sync::Arc;

use bedrock_domain::DecisionEngine;
use bedrock_storage::DataStore;

use adapters::DataStoreAdapter;
use handlers::{BatchEvaluateHandler, DefinitionWriter, EvaluateHandler};

// Re-exports for convenience
pub use config::{ConfigLoadError, ServerConfig};

/// Engine type used by the handlers for a given storage backend.
pub type Engine<S> = DecisionEngine<DataStoreAdapter<S>>;

/// Handlers sharing one engine over one storage backend.
pub struct Service<S: DataStore> {
    pub engine: Arc<Engine<S>>,
    pub evaluate: EvaluateHandler<DataStoreAdapter<S>>,
    pub batch: BatchEvaluateHandler<DataStoreAdapter<S>>,
    pub definitions: DefinitionWriter<S>,
}

impl<S: DataStore> Service<S> {
    /// Build the engine and handlers from `config` over `storage`.
    pub fn new(storage: Arc<S>, config: &ServerConfig) -> Self {
        let definitions = DefinitionWriter::new(Arc::clone(&storage));
        let adapter = Arc::new(DataStoreAdapter::new(storage));
        let engine = Arc::new(DecisionEngine::with_config(adapter, config.engine_config()));
        Self {
            evaluate: EvaluateHandler::new(Arc::clone(&engine)),
            batch: BatchEvaluateHandler::with_settings(Arc::clone(&engine), &config.batch),
            definitions,
            engine,
        }
    }
}
