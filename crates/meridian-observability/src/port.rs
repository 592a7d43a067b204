//! The `ObservabilityPort` trait (spec §4.2): the one seam every other
//! crate uses to emit spans and metrics, so the CDC and CQRS cores stay
//! free of direct `tracing`/`metrics` calls and can be driven by a test
//! double in unit tests.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

/// The stage of the materializer pipeline a span covers, used only for
/// labeling — the port itself is stage-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeStage {
    /// Decoding the raw envelope off the log.
    Decode,
    /// Acquiring the per-aggregate write lock.
    Lock,
    /// Applying the staleness check and upsert/delete.
    Apply,
}

impl ConsumeStage {
    /// Stable label used in span/metric names.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Lock => "lock",
            Self::Apply => "apply",
        }
    }
}

/// Four emission contracts covering everything the CDC materializer and
/// the CQRS command pipeline need to report (spec §4.2).
#[async_trait]
pub trait ObservabilityPort: Send + Sync {
    /// Open a span around one pipeline stage for one envelope/aggregate.
    fn span_consume(&self, stage: ConsumeStage, aggregate_id: Uuid) -> tracing::Span;

    /// Record that one envelope was processed, successfully or not.
    fn record_processed(&self, operation: &str, outcome: &str);

    /// Record an error, tagged with the component that raised it.
    fn record_error(&self, component: &str, error_code: &str);

    /// Record a downstream database operation's outcome.
    fn record_db_operation(&self, operation: &str, success: bool);

    /// Record a latency observation for a named operation.
    fn record_latency(&self, operation: &str, duration: Duration);
}
