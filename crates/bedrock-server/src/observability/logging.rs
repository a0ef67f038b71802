//! Structured logging configuration.
//!
//! Log entries are written through `tracing-subscriber`, either as JSON
//! lines or as pretty text:
//!
//! ```json
//! {"timestamp":"2026-01-15T10:30:00.000Z","level":"DEBUG","target":"bedrock_domain::engine","fields":{"message":"policy matched"}}
//! ```
//!
//! `RUST_LOG` takes precedence over the configured level.
//!
//! # Usage
//!
//! ```ignore
//! use bedrock_server::config::ServerConfig;
//! use bedrock_server::observability::init_logging;
//!
//! let config = ServerConfig::from_env()?;
//! init_logging(&config.logging);
//! ```

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Parse a configured level name, falling back to `INFO`.
pub fn parse_level(level: &str) -> Level {
    level.parse().unwrap_or(Level::INFO)
}

/// Initialize the global subscriber.
///
/// Call once at startup. Later calls have no effect because the subscriber
/// is global.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(&config.level).to_string()));

    if config.json {
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_file(false)
                .with_line_number(false),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_target(true));
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// A JSON subscriber writing to `writer`, for capturing log output.
pub fn create_json_layer<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new("trace"))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}
