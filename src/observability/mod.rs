//! Structured logging and in-process metrics for the worker
//!
//! Metrics are exposed over the control endpoint; logging is configured
//! from the environment at startup.

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat, LogSettings};
pub use metrics::{MetricsCollector, MetricsSnapshot, metrics};

// Span macros for structured logging
pub use logging::{lifecycle_span, registration_span, task_span};
