//! Telemetry
//!
//! Metrics for credential lifecycle and resilience events. Log output goes
//! through the `tracing` facade; attempt-level records are delivered to
//! [`crate::resilience::AttemptObserver`].

pub mod metrics;

pub use metrics::{
    AuthMetrics, FallbackReason, InMemoryMetrics, MetricEntry, MetricLabels, NoOpMetrics,
};
