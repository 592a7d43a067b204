//! Tracing and metrics emission contracts shared by the CDC materializer
//! and saga/CQRS core (spec §4.2).

pub mod port;
pub mod testing;
pub mod tracing_metrics;

pub use port::{ConsumeStage, ObservabilityPort};
pub use testing::{NullObservabilityPort, RecordingObservabilityPort};
pub use tracing_metrics::TracingMetricsObservability;
