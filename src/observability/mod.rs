//! Observability for the MQTT client engine
//!
//! Structured logging through `tracing`. Connection diagnostics live with the
//! client itself in [`crate::transport::mqtt::HealthMetrics`].

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{connection_span, mqtt_span};
