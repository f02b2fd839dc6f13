//! Observability for detect-relay
//!
//! Structured logging through `tracing`. The library only emits events; the
//! binary installs the subscriber.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
