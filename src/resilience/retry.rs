//! Retry Logic
//!
//! Bounded retries with exponential backoff and positive jitter. Failures are
//! classified through [`FailureKind`]; terminal kinds are re-raised at once.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AnnotationError, AnnotationResult, FailureKind, RetryDisposition};

/// Retry policy. Immutable once built and shared between calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of the exponential delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// Jitter fraction (0.0-1.0), added on top of the delay.
    pub jitter_fraction: f64,
    overrides: HashMap<FailureKind, RetryDisposition>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
            overrides: HashMap::new(),
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter.
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter_fraction: 0.0,
            overrides: HashMap::new(),
        }
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 1.0)
    }

    pub fn with_jitter(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction.clamp(0.0, 1.0);
        self
    }

    /// Override the disposition of a remote failure kind.
    ///
    /// Kinds that are not reclassifiable keep their fixed disposition.
    pub fn classify(mut self, kind: FailureKind, disposition: RetryDisposition) -> Self {
        if kind.is_reclassifiable() {
            self.overrides.insert(kind, disposition);
        } else {
            warn!(kind = %kind, "ignoring retry override for fixed failure kind");
        }
        self
    }

    /// Effective disposition of a failure kind.
    pub fn disposition(&self, kind: FailureKind) -> RetryDisposition {
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_disposition())
    }

    /// Whether an error may be retried under this policy.
    pub fn should_retry(&self, error: &AnnotationError) -> bool {
        self.disposition(error.kind()) == RetryDisposition::Retryable
    }

    /// Backoff before retry `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let max = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        if !delay.is_finite() || delay >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay.max(0.0))
        }
    }

    /// Backoff plus random positive jitter of up to `jitter_fraction`.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt).as_secs_f64();
        if self.jitter_fraction <= 0.0 || delay == 0.0 {
            return Duration::from_secs_f64(delay);
        }
        let jitter = rand::thread_rng().gen_range(0.0..=delay * self.jitter_fraction);
        Duration::from_secs_f64(delay + jitter)
    }

    fn delay_before_retry(&self, attempt: u32, error: &AnnotationError) -> Duration {
        let delay = self.jittered_backoff(attempt);
        match error.retry_after() {
            Some(hint) => delay.max(hint.min(self.max_delay)),
            None => delay,
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The unit of work succeeded.
    Succeeded,
    /// Retryable failure; the next attempt follows after `next_delay`.
    Retrying {
        kind: FailureKind,
        next_delay: Duration,
    },
    /// Terminal failure, re-raised immediately.
    Failed { kind: FailureKind },
    /// Retryable failure with no attempts left.
    Exhausted { kind: FailureKind },
}

/// Record of one attempt, handed to the observer and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// Logical operation name.
    pub operation: String,
    /// Attempt index, starting at 0.
    pub attempt: u32,
    /// Delay slept before this attempt.
    pub delay_before: Duration,
    /// What happened.
    pub outcome: AttemptOutcome,
}

/// Observer hook called after every attempt.
pub trait AttemptObserver: Send + Sync {
    fn on_attempt(&self, record: &AttemptRecord);
}

/// Observer that logs attempts through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAttemptObserver;

impl AttemptObserver for TracingAttemptObserver {
    fn on_attempt(&self, record: &AttemptRecord) {
        match &record.outcome {
            AttemptOutcome::Succeeded => debug!(
                operation = %record.operation,
                attempt = record.attempt,
                "attempt succeeded"
            ),
            AttemptOutcome::Retrying { kind, next_delay } => warn!(
                operation = %record.operation,
                attempt = record.attempt,
                kind = %kind,
                delay_ms = next_delay.as_millis() as u64,
                "attempt failed, retrying"
            ),
            AttemptOutcome::Failed { kind } => debug!(
                operation = %record.operation,
                attempt = record.attempt,
                kind = %kind,
                "terminal failure, not retrying"
            ),
            AttemptOutcome::Exhausted { kind } => warn!(
                operation = %record.operation,
                attempt = record.attempt,
                kind = %kind,
                "retry attempts exhausted"
            ),
        }
    }
}

/// Observer that keeps every record, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingAttemptObserver {
    records: Mutex<Vec<AttemptRecord>>,
}

impl RecordingAttemptObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records.lock().clone()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl AttemptObserver for RecordingAttemptObserver {
    fn on_attempt(&self, record: &AttemptRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Retry statistics.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_attempts: u32,
    pub successful_retries: u32,
    pub failed_operations: u32,
}

/// Runs a unit of work under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryExecutor {
    policy: Arc<RetryPolicy>,
    observer: Arc<dyn AttemptObserver>,
    stats: Arc<Mutex<RetryStats>>,
}

impl RetryExecutor {
    /// Create executor logging attempts through `tracing`.
    pub fn new(policy: Arc<RetryPolicy>) -> Self {
        Self::with_observer(policy, Arc::new(TracingAttemptObserver))
    }

    pub fn with_observer(policy: Arc<RetryPolicy>, observer: Arc<dyn AttemptObserver>) -> Self {
        Self {
            policy,
            observer,
            stats: Arc::new(Mutex::new(RetryStats::default())),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `unit` until it succeeds, fails terminally or runs out of attempts.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut unit: F) -> AnnotationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AnnotationResult<T>>,
    {
        let mut attempt = 0u32;
        let mut delay_before = Duration::ZERO;

        loop {
            self.stats.lock().total_attempts += 1;

            let error = match unit().await {
                Ok(value) => {
                    self.observe(operation, attempt, delay_before, AttemptOutcome::Succeeded);
                    if attempt > 0 {
                        self.stats.lock().successful_retries += 1;
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let kind = error.kind();

            if !self.policy.should_retry(&error) {
                self.observe(operation, attempt, delay_before, AttemptOutcome::Failed { kind });
                self.stats.lock().failed_operations += 1;
                return Err(error);
            }

            if attempt + 1 >= self.policy.max_attempts {
                self.observe(operation, attempt, delay_before, AttemptOutcome::Exhausted { kind });
                self.stats.lock().failed_operations += 1;
                return Err(error);
            }

            let next_delay = self.policy.delay_before_retry(attempt, &error);
            self.observe(
                operation,
                attempt,
                delay_before,
                AttemptOutcome::Retrying { kind, next_delay },
            );

            tokio::time::sleep(next_delay).await;
            delay_before = next_delay;
            attempt += 1;
        }
    }

    /// Get retry statistics.
    pub fn stats(&self) -> RetryStats {
        self.stats.lock().clone()
    }

    fn observe(
        &self,
        operation: &str,
        attempt: u32,
        delay_before: Duration,
        outcome: AttemptOutcome,
    ) {
        self.observer.on_attempt(&AttemptRecord {
            operation: operation.to_string(),
            attempt,
            delay_before,
            outcome,
        });
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(RetryPolicy::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorContext, NetworkError, RemoteError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn timeout() -> AnnotationError {
        NetworkError::Timeout {
            operation: "GET /tasks".to_string(),
            timeout: Duration::from_secs(1),
        }
        .into()
    }

    fn remote(status: u16) -> AnnotationError {
        crate::error::error_from_response("GET /tasks", status, "", None, &[])
    }

    #[test]
    fn test_backoff_sequence_is_capped() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_secs(1),
            Duration::from_secs(30),
            2.0,
        );

        let delays: Vec<u64> = (0..6).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30]);

        for n in 0..64 {
            assert!(policy.backoff(n) <= Duration::from_secs(30));
        }
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_is_positive_and_bounded() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(30), 2.0)
            .with_jitter(0.25);

        for _ in 0..100 {
            let delay = policy.jittered_backoff(1);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_only_remote_kinds_can_be_reclassified() {
        let policy = RetryPolicy::default()
            .classify(FailureKind::ServerError, RetryDisposition::Retryable)
            .classify(FailureKind::MalformedRequest, RetryDisposition::Retryable)
            .classify(FailureKind::Connection, RetryDisposition::Terminal);

        assert_eq!(policy.disposition(FailureKind::ServerError), RetryDisposition::Retryable);
        assert_eq!(policy.disposition(FailureKind::MalformedRequest), RetryDisposition::Terminal);
        assert_eq!(policy.disposition(FailureKind::Connection), RetryDisposition::Retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_network_failures_with_backoff() {
        let observer = Arc::new(RecordingAttemptObserver::new());
        let executor = RetryExecutor::with_observer(
            Arc::new(RetryPolicy::new(4, Duration::from_secs(1), Duration::from_secs(30), 2.0)),
            observer.clone(),
        );
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("GET /tasks", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(timeout())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let records = observer.records();
        let delays: Vec<_> = records.iter().map(|r| r.delay_before).collect();
        assert_eq!(
            delays,
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(records[2].outcome, AttemptOutcome::Succeeded);
        assert_eq!(executor.stats().successful_retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_request_is_never_retried() {
        let executor = RetryExecutor::new(Arc::new(RetryPolicy::new(
            5,
            Duration::from_millis(10),
            Duration::from_secs(1),
            2.0,
        )));
        let calls = AtomicU32::new(0);

        let result: AnnotationResult<()> = executor
            .execute("POST /tasks", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(remote(400)) }
            })
            .await;

        assert!(matches!(
            result,
            Err(AnnotationError::Remote(RemoteError::MalformedRequest { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let observer = Arc::new(RecordingAttemptObserver::new());
        let executor = RetryExecutor::with_observer(
            Arc::new(RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1), 2.0)),
            observer.clone(),
        );
        let calls = AtomicU32::new(0);

        let result: AnnotationResult<()> = executor
            .execute("GET /tasks", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout()) }
            })
            .await;

        assert!(matches!(result, Err(AnnotationError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            observer.records().last().map(|r| r.outcome.clone()),
            Some(AttemptOutcome::Exhausted {
                kind: FailureKind::Timeout
            })
        );
        assert_eq!(executor.stats().failed_operations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclassified_server_error_is_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1), 2.0)
            .classify(FailureKind::ServerError, RetryDisposition::Retryable);
        let executor = RetryExecutor::new(Arc::new(policy));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute("GET /tasks", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(remote(503))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_extends_delay() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(30), 2.0)
            .classify(FailureKind::RateLimited, RetryDisposition::Retryable);
        let observer = Arc::new(RecordingAttemptObserver::new());
        let executor = RetryExecutor::with_observer(Arc::new(policy), observer.clone());
        let calls = AtomicU32::new(0);

        let _ = executor
            .execute("GET /tasks", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(AnnotationError::Remote(RemoteError::RateLimited {
                            context: ErrorContext::new("GET /tasks").with_status(429),
                            retry_after: Some(Duration::from_secs(5)),
                        }))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(observer.records()[1].delay_before, Duration::from_secs(5));
    }
}
