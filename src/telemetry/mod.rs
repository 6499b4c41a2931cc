//! Telemetry
//!
//! Observability for broker operations.
//!
//! - **Metrics**: issuance, revocation, probe and reconciliation counters
//! - **Logging**: `tracing-subscriber` setup for hosts

pub mod logging;
pub mod metrics;

pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use metrics::{
    create_in_memory_metrics, no_op_metrics, BrokerMetrics, InMemoryMetrics, MetricEntry,
    MetricLabels, NoOpMetrics,
};
