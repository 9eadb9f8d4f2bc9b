//! Circuit Breaker
//!
//! Named three-state breaker guarding one downstream dependency.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{AnnotationError, AnnotationResult};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, one trial request is allowed.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time since the last failure before a trial call is let through.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        DEFAULT_CIRCUIT_BREAKER_CONFIG
    }
}

/// Default circuit breaker configuration.
pub const DEFAULT_CIRCUIT_BREAKER_CONFIG: CircuitBreakerConfig = CircuitBreakerConfig {
    failure_threshold: 5,
    recovery_timeout: Duration::from_secs(30),
};

/// Circuit breaker statistics.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerStats {
    pub total_requests: u32,
    pub successful_requests: u32,
    pub failed_requests: u32,
    pub rejected_requests: u32,
    pub state_transitions: u32,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial: Option<u64>,
    next_trial_id: u64,
    stats: CircuitBreakerStats,
}

/// Circuit breaker for one named dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

/// Admission ticket for one call; releases a half-open trial slot if the
/// call is dropped before reporting an outcome.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.trial {
            let mut state = self.breaker.state.lock();
            if state.trial == Some(id) {
                state.trial = None;
            }
        }
    }
}

impl CircuitBreaker {
    /// Create new circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial: None,
                next_trial_id: 0,
                stats: CircuitBreakerStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state; an open circuit past its recovery timeout reads as half-open.
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.promote_if_recovered(&mut state);
        state.state
    }

    /// Consecutive failures counted while closed.
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Execute an operation through the circuit breaker.
    ///
    /// Rejected calls fail with [`AnnotationError::CircuitOpen`] and never run
    /// `operation`. Errors that say nothing about the dependency's health
    /// count as successes.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> AnnotationResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AnnotationResult<T>>,
    {
        let _admission = self.admit()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) if error.kind().counts_against_breaker() => {
                self.record_failure();
                Err(error)
            }
            Err(error) => {
                self.record_success();
                Err(error)
            }
        }
    }

    fn admit(&self) -> AnnotationResult<Admission<'_>> {
        let mut state = self.state.lock();
        state.stats.total_requests += 1;
        self.promote_if_recovered(&mut state);

        match state.state {
            CircuitState::Closed => Ok(Admission {
                breaker: self,
                trial: None,
            }),
            CircuitState::HalfOpen if state.trial.is_none() => {
                let id = state.next_trial_id;
                state.next_trial_id += 1;
                state.trial = Some(id);
                debug!(breaker = %self.name, "letting recovery trial through");
                Ok(Admission {
                    breaker: self,
                    trial: Some(id),
                })
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                state.stats.rejected_requests += 1;
                debug!(breaker = %self.name, state = state.state.as_str(), "call rejected");
                Err(AnnotationError::CircuitOpen {
                    breaker: self.name.clone(),
                })
            }
        }
    }

    fn promote_if_recovered(&self, state: &mut BreakerState) {
        if state.state != CircuitState::Open {
            return;
        }
        let recovered = state
            .last_failure_time
            .map(|last| last.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(true);
        if recovered {
            state.state = CircuitState::HalfOpen;
            state.trial = None;
            state.stats.state_transitions += 1;
            info!(breaker = %self.name, "circuit half-open");
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.stats.successful_requests += 1;

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.trial = None;
                state.stats.state_transitions += 1;
                info!(breaker = %self.name, "circuit closed");
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.stats.failed_requests += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.stats.state_transitions += 1;
                    warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.trial = None;
                state.stats.state_transitions += 1;
                warn!(breaker = %self.name, "recovery trial failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Reset the circuit breaker.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure_time = None;
        state.trial = None;
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        self.state.lock().stats.clone()
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state.lock().state)
            .finish()
    }
}
