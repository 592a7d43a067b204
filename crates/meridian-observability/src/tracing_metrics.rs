//! Production `ObservabilityPort` backed by `tracing` spans and the
//! `metrics` facade, grounded on the teacher's
//! `fraiseql_runtime::observability::metrics` module (the
//! `describe_counter!`/`counter!`/`histogram!` macro usage and the
//! `OperationMetrics` SLO-tracking helper).

use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use uuid::Uuid;

use crate::port::{ConsumeStage, ObservabilityPort};

/// `ObservabilityPort` implementation that emits real spans and metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsObservability;

impl TracingMetricsObservability {
    /// Register metric descriptions with the installed recorder. Call
    /// once at process startup, after `PrometheusBuilder::install_recorder`.
    pub fn describe_metrics() {
        describe_counter!(
            "meridian_envelopes_processed_total",
            "Total CDC envelopes processed, by operation and outcome"
        );
        describe_counter!(
            "meridian_errors_total",
            "Total errors, by component and error code"
        );
        describe_counter!(
            "meridian_db_operations_total",
            "Total database operations, by operation and success"
        );
        describe_histogram!(
            "meridian_operation_duration_seconds",
            "Duration of a named operation, in seconds"
        );
    }
}

#[async_trait]
impl ObservabilityPort for TracingMetricsObservability {
    fn span_consume(&self, stage: ConsumeStage, aggregate_id: Uuid) -> tracing::Span {
        tracing::debug_span!(
            "cdc_consume",
            stage = stage.label(),
            aggregate_id = %aggregate_id,
        )
    }

    fn record_processed(&self, operation: &str, outcome: &str) {
        counter!(
            "meridian_envelopes_processed_total",
            "operation" => operation.to_string(),
            "outcome" => outcome.to_string(),
        )
        .increment(1);
    }

    fn record_error(&self, component: &str, error_code: &str) {
        counter!(
            "meridian_errors_total",
            "component" => component.to_string(),
            "error_code" => error_code.to_string(),
        )
        .increment(1);
        tracing::warn!(component, error_code, "operation failed");
    }

    fn record_db_operation(&self, operation: &str, success: bool) {
        counter!(
            "meridian_db_operations_total",
            "operation" => operation.to_string(),
            "success" => success.to_string(),
        )
        .increment(1);
    }

    fn record_latency(&self, operation: &str, duration: Duration) {
        histogram!(
            "meridian_operation_duration_seconds",
            "operation" => operation.to_string(),
        )
        .record(duration.as_secs_f64());
    }
}
