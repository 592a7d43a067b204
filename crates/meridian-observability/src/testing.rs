//! Test doubles for [`ObservabilityPort`], letting unit tests assert on
//! what was recorded without a live metrics recorder installed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::port::{ConsumeStage, ObservabilityPort};

/// Discards everything. Use where a port is required but assertions
/// aren't — e.g. benchmarks, or aggregate-only unit tests.
#[derive(Debug, Default)]
pub struct NullObservabilityPort;

#[async_trait]
impl ObservabilityPort for NullObservabilityPort {
    fn span_consume(&self, _stage: ConsumeStage, _aggregate_id: Uuid) -> tracing::Span {
        tracing::Span::none()
    }

    fn record_processed(&self, _operation: &str, _outcome: &str) {}
    fn record_error(&self, _component: &str, _error_code: &str) {}
    fn record_db_operation(&self, _operation: &str, _success: bool) {}
    fn record_latency(&self, _operation: &str, _duration: Duration) {}
}

#[derive(Debug, Default)]
struct Counts {
    processed: HashMap<(String, String), u64>,
    errors: HashMap<(String, String), u64>,
    db_operations: HashMap<(String, bool), u64>,
    latencies: HashMap<String, Vec<Duration>>,
}

/// Records every call so tests can assert on it, taking a
/// baseline/delta snapshot the way integration tests typically check
/// "N more events were recorded since the start of this test".
#[derive(Default)]
pub struct RecordingObservabilityPort {
    counts: Mutex<Counts>,
}

impl RecordingObservabilityPort {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `record_processed(operation, outcome)` calls so far.
    #[must_use]
    pub fn processed_count(&self, operation: &str, outcome: &str) -> u64 {
        self.counts
            .lock()
            .expect("lock poisoned")
            .processed
            .get(&(operation.to_string(), outcome.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Number of `record_error(component, error_code)` calls so far.
    #[must_use]
    pub fn error_count(&self, component: &str, error_code: &str) -> u64 {
        self.counts
            .lock()
            .expect("lock poisoned")
            .errors
            .get(&(component.to_string(), error_code.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Number of `record_db_operation(operation, success)` calls so far.
    #[must_use]
    pub fn db_operation_count(&self, operation: &str, success: bool) -> u64 {
        self.counts
            .lock()
            .expect("lock poisoned")
            .db_operations
            .get(&(operation.to_string(), success))
            .copied()
            .unwrap_or(0)
    }

    /// All latency observations recorded for `operation`.
    #[must_use]
    pub fn latencies(&self, operation: &str) -> Vec<Duration> {
        self.counts
            .lock()
            .expect("lock poisoned")
            .latencies
            .get(operation)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObservabilityPort for RecordingObservabilityPort {
    fn span_consume(&self, _stage: ConsumeStage, _aggregate_id: Uuid) -> tracing::Span {
        tracing::Span::none()
    }

    fn record_processed(&self, operation: &str, outcome: &str) {
        *self
            .counts
            .lock()
            .expect("lock poisoned")
            .processed
            .entry((operation.to_string(), outcome.to_string()))
            .or_insert(0) += 1;
    }

    fn record_error(&self, component: &str, error_code: &str) {
        *self
            .counts
            .lock()
            .expect("lock poisoned")
            .errors
            .entry((component.to_string(), error_code.to_string()))
            .or_insert(0) += 1;
    }

    fn record_db_operation(&self, operation: &str, success: bool) {
        *self
            .counts
            .lock()
            .expect("lock poisoned")
            .db_operations
            .entry((operation.to_string(), success))
            .or_insert(0) += 1;
    }

    fn record_latency(&self, operation: &str, duration: Duration) {
        self.counts
            .lock()
            .expect("lock poisoned")
            .latencies
            .entry(operation.to_string())
            .or_default()
            .push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reports_processed_counts() {
        let port = RecordingObservabilityPort::new();
        port.record_processed("upsert", "applied");
        port.record_processed("upsert", "applied");
        port.record_processed("upsert", "stale");

        assert_eq!(port.processed_count("upsert", "applied"), 2);
        assert_eq!(port.processed_count("upsert", "stale"), 1);
        assert_eq!(port.processed_count("delete", "applied"), 0);
    }

    #[test]
    fn records_latency_observations() {
        let port = RecordingObservabilityPort::new();
        port.record_latency("materialize", Duration::from_millis(5));
        port.record_latency("materialize", Duration::from_millis(10));
        assert_eq!(port.latencies("materialize").len(), 2);
    }
}
