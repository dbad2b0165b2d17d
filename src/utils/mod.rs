//! # Utility Modules
//!
//! Supporting utilities for logging and observability.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup from configuration
//! - **Metrics**: Thread-safe driver counters

pub mod logging;
pub mod metrics;

pub use metrics::{global_metrics, Metrics, MetricsSnapshot};
