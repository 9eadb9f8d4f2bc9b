//! Metrics
//!
//! Authentication and resilience counters.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Metric labels.
pub type MetricLabels = HashMap<String, String>;

/// Why a refresh fell back to a full login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackReason {
    /// The service rejected the refresh secret.
    RefreshRejected,
    /// The refresh response could not be turned into a credential.
    MalformedResponse,
    /// No refresh secret was held.
    MissingRefreshSecret,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshRejected => "refresh_rejected",
            Self::MalformedResponse => "malformed_response",
            Self::MissingRefreshSecret => "missing_refresh_secret",
        }
    }
}

/// Authentication and resilience metrics interface.
pub trait AuthMetrics: Send + Sync {
    /// Record a login exchange.
    fn record_login(&self, success: bool);

    /// Record a refresh exchange.
    fn record_refresh(&self, success: bool);

    /// Record a refresh that fell back to login.
    fn record_refresh_fallback(&self, reason: FallbackReason);

    /// Record the credential store being wiped.
    fn record_credential_cleared(&self);

    /// Record a one-shot recovery from an expired credential.
    fn record_expired_recovery(&self, success: bool);

    /// Record a call rejected by an open circuit.
    fn record_circuit_rejection(&self, breaker: &str);

    /// Record a completed downstream call.
    fn record_request(&self, operation: &str, status: Option<u16>, duration_ms: f64);
}

/// No-op metrics implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl AuthMetrics for NoOpMetrics {
    fn record_login(&self, _success: bool) {}
    fn record_refresh(&self, _success: bool) {}
    fn record_refresh_fallback(&self, _reason: FallbackReason) {}
    fn record_credential_cleared(&self) {}
    fn record_expired_recovery(&self, _success: bool) {}
    fn record_circuit_rejection(&self, _breaker: &str) {}
    fn record_request(&self, _operation: &str, _status: Option<u16>, _duration_ms: f64) {}
}

/// Metric entry for in-memory storage.
#[derive(Debug, Clone)]
pub struct MetricEntry {
    pub name: String,
    pub value: f64,
    pub labels: MetricLabels,
    pub timestamp: i64,
}

/// In-memory metrics for tests and diagnostics.
///
/// Holds at most `capacity` entries; once full, the oldest entry is dropped
/// for each new one.
#[derive(Debug)]
pub struct InMemoryMetrics {
    entries: Mutex<VecDeque<MetricEntry>>,
    capacity: usize,
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::with_capacity(InMemoryMetrics::DEFAULT_CAPACITY)
    }
}

impl InMemoryMetrics {
    /// Entries retained by [`InMemoryMetrics::new`].
    pub const DEFAULT_CAPACITY: usize = 10_000;

    /// Create new in-memory metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create in-memory metrics retaining at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Get all recorded entries, oldest first.
    pub fn get_entries(&self) -> Vec<MetricEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Get entries by name.
    pub fn get_entries_by_name(&self, name: &str) -> Vec<MetricEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Number of entries named `name` carrying label `key=value`.
    pub fn count_with_label(&self, name: &str, key: &str, value: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.name == name && e.labels.get(key).map(String::as_str) == Some(value))
            .count()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn record(&self, name: &str, value: f64, labels: &[(&str, String)]) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(MetricEntry {
            name: name.to_string(),
            value,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
    }
}

impl AuthMetrics for InMemoryMetrics {
    fn record_login(&self, success: bool) {
        self.record("annotation_logins_total", 1.0, &[("success", success.to_string())]);
    }

    fn record_refresh(&self, success: bool) {
        self.record("annotation_refreshes_total", 1.0, &[("success", success.to_string())]);
    }

    fn record_refresh_fallback(&self, reason: FallbackReason) {
        self.record(
            "annotation_refresh_fallbacks_total",
            1.0,
            &[("reason", reason.as_str().to_string())],
        );
    }

    fn record_credential_cleared(&self) {
        self.record("annotation_credential_clears_total", 1.0, &[]);
    }

    fn record_expired_recovery(&self, success: bool) {
        self.record(
            "annotation_expired_recoveries_total",
            1.0,
            &[("success", success.to_string())],
        );
    }

    fn record_circuit_rejection(&self, breaker: &str) {
        self.record(
            "annotation_circuit_rejections_total",
            1.0,
            &[("breaker", breaker.to_string())],
        );
    }

    fn record_request(&self, operation: &str, status: Option<u16>, duration_ms: f64) {
        self.record(
            "annotation_request_duration_ms",
            duration_ms,
            &[
                ("operation", operation.to_string()),
                (
                    "status",
                    status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()),
                ),
            ],
        );
    }
}
