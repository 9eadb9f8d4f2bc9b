//! Resilience
//!
//! Retry and circuit breaking for annotation-service calls.

pub mod circuit_breaker;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
    DEFAULT_CIRCUIT_BREAKER_CONFIG,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::{
    AttemptObserver, AttemptOutcome, AttemptRecord, RecordingAttemptObserver, RetryExecutor,
    RetryPolicy, RetryStats, TracingAttemptObserver,
};
