//! Observability infrastructure for Bedrock.
//!
//! Structured logging only; there is no metrics or trace export.

mod logging;

pub use logging::{create_json_layer, init_logging, parse_level};
