//! The abstract "ordered, partitioned log" the materializer consumes
//! (spec §4.1, §5, §6): per-partition FIFO, per-key co-partitioning. No
//! other semantics are assumed, so a test fake and the `rdkafka` adapter
//! satisfy the same trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CdcResult;

/// One raw record read off the log, before envelope decoding.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Partition the record was read from.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Record key, if any (Debezium envelopes carry the aggregate id here).
    pub key: Option<Value>,
    /// Record value — `None` for a tombstone.
    pub value: Option<Value>,
}

/// Source of CDC records. Implementations only need to guarantee
/// per-partition FIFO delivery within one `next_batch` stream; the
/// materializer does the rest (staleness guard, per-key locking).
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Fetch the next batch of records, blocking (cooperatively) until at
    /// least one is available or the source is closed.
    async fn next_batch(&self, max: usize) -> CdcResult<Vec<LogRecord>>;

    /// Acknowledge a record as durably applied, allowing offset
    /// advancement. The materializer never calls this before the
    /// downstream store confirms the write (spec §4.1 step 7).
    async fn ack(&self, partition: i32, offset: i64) -> CdcResult<()>;
}
