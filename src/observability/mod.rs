//! Observability for the session controller
//!
//! Structured logging through `tracing`, with span macros for broker
//! lifecycle transitions and MQTT operations.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
