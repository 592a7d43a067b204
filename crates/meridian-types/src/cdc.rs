//! Change-data-capture envelope and materialized document types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The operation a CDC envelope carries, as emitted by the source connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Row was created.
    Create,
    /// Row was updated.
    Update,
    /// Row was deleted.
    Delete,
    /// Operation code was absent or unrecognized.
    Unknown,
}

impl Operation {
    /// Parse the single-character operation code used by the source connector
    /// (`c`, `u`, `d`); anything else becomes [`Operation::Unknown`].
    #[must_use]
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("c") => Self::Create,
            Some("u") => Self::Update,
            Some("d") => Self::Delete,
            _ => Self::Unknown,
        }
    }
}

/// A structured change record: operation kind, payload or tombstone,
/// partition, and offset.
///
/// A `value` of `None` is a tombstone. An envelope is a delete when
/// `operation == Delete` or `deleted == Some(true)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcEnvelope {
    /// Stable identifier of the aggregate this envelope describes.
    pub aggregate_id: Uuid,
    /// Operation code from the source.
    pub operation: Operation,
    /// Explicit soft-delete flag, independent of `operation`.
    pub deleted: Option<bool>,
    /// Monotonic logical time from the source, per aggregate.
    pub source_timestamp: Option<i64>,
    /// Source-supplied key (opaque to the materializer).
    pub key: Option<Value>,
    /// Payload, or `None` for a tombstone.
    pub value: Option<Value>,
    /// Log partition this envelope arrived on.
    pub partition: i32,
    /// Log offset within the partition.
    pub offset: i64,
}

impl CdcEnvelope {
    /// `true` if this envelope is a tombstone (`value` is absent).
    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// `true` if this envelope represents a delete, per the operation code
    /// or the explicit `deleted` flag.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.operation == Operation::Delete || self.deleted == Some(true)
    }

    /// Source timestamp with the envelope's default of "infinitely new"
    /// when absent, per spec §4.1 step 5 (`new_ts = envelope.source_timestamp ?? ∞`).
    #[must_use]
    pub fn effective_timestamp(&self) -> i64 {
        self.source_timestamp.unwrap_or(i64::MAX)
    }
}

/// CDC provenance metadata carried alongside a materialized document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcMetadata {
    /// Source timestamp of the envelope that produced this state.
    pub source_timestamp: i64,
    /// Operation that produced this state.
    pub operation: Operation,
    /// Log offset of the producing envelope.
    pub log_offset: i64,
    /// Log partition of the producing envelope.
    pub log_partition: i32,
    /// Wall-clock time the materializer applied this state.
    pub processed_at: DateTime<Utc>,
}

/// A materialized, per-aggregate document in the downstream store.
///
/// Invariant: `cdc_metadata.source_timestamp` is the maximum ever applied
/// for this `_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializedDocument {
    /// Document key, equal to the source aggregate id.
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// Domain fields, opaque to the materializer (no field-level merge).
    pub fields: Value,
    /// CDC provenance for this document's current state.
    pub cdc_metadata: CdcMetadata,
}

/// Policy for the out-of-order guard in spec §4.1 step 5.
///
/// Left open by spec §9: "implementers should make the comparator explicit
/// and configurable."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StalenessPolicy {
    /// `new_ts <= stored_ts` is stale (equal timestamps are skipped).
    /// This is the spec's documented default (§8 scenario B).
    LessOrEqual,
    /// `new_ts < stored_ts` is stale (equal timestamps are re-applied).
    StrictlyLess,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::LessOrEqual
    }
}

impl StalenessPolicy {
    /// `true` if `new_ts` should be rejected as stale against `stored_ts`.
    #[must_use]
    pub const fn is_stale(self, new_ts: i64, stored_ts: i64) -> bool {
        match self {
            Self::LessOrEqual => new_ts <= stored_ts,
            Self::StrictlyLess => new_ts < stored_ts,
        }
    }
}
