//! Decodes a raw [`LogRecord`] into a [`CdcEnvelope`] (spec §4.1 step 2).
//!
//! The wire shape is Debezium-style: `{"payload": {"after": {...} | null,
//! "op": "c"|"u"|"d"|"r", "source": {"ts_ms": ..}}}`, with the aggregate
//! id carried in the record key. Any shape that can't be decoded this way
//! is a permanent decode failure (CDC001), never retried.

use meridian_types::{CdcEnvelope, Operation};
use serde_json::Value;
use uuid::Uuid;

use crate::error::CdcError;
use crate::source::LogRecord;

fn extract_aggregate_id(record: &LogRecord) -> Result<Uuid, CdcError> {
    let key = record.key.as_ref().ok_or_else(|| CdcError::DecodeFailed {
        reason: "record has no key; cannot determine aggregate_id".into(),
    })?;

    let id_str = key
        .get("id")
        .or_else(|| key.get("aggregate_id"))
        .and_then(Value::as_str)
        .or_else(|| key.as_str())
        .ok_or_else(|| CdcError::DecodeFailed {
            reason: format!("key has no recognizable id field: {key}"),
        })?;

    Uuid::parse_str(id_str).map_err(|e| CdcError::DecodeFailed {
        reason: format!("key id `{id_str}` is not a uuid: {e}"),
    })
}

/// Decode one [`LogRecord`] into a [`CdcEnvelope`]. A `None` value is a
/// tombstone and decodes successfully with `value: None`.
pub fn decode(record: &LogRecord) -> Result<CdcEnvelope, CdcError> {
    let aggregate_id = extract_aggregate_id(record)?;

    let Some(value) = &record.value else {
        return Ok(CdcEnvelope {
            aggregate_id,
            operation: Operation::Unknown,
            deleted: None,
            source_timestamp: None,
            key: record.key.clone(),
            value: None,
            partition: record.partition,
            offset: record.offset,
        });
    };

    let payload = value.get("payload").unwrap_or(value);

    let op_code = payload.get("op").and_then(Value::as_str);
    let operation = Operation::from_code(op_code);

    let deleted = payload
        .get("deleted")
        .and_then(Value::as_str)
        .map(|s| s.eq_ignore_ascii_case("true"));

    let source_timestamp = payload
        .get("source")
        .and_then(|s| s.get("ts_ms"))
        .and_then(Value::as_i64)
        .or_else(|| payload.get("ts_ms").and_then(Value::as_i64));

    let after = payload.get("after").cloned();

    Ok(CdcEnvelope {
        aggregate_id,
        operation,
        deleted,
        source_timestamp,
        key: record.key.clone(),
        value: after,
        partition: record.partition,
        offset: record.offset,
    })
}
