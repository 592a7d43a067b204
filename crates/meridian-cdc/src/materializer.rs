//! The CDC materializer (spec §4.1): decodes envelopes, enforces
//! per-aggregate single-writer ordering, suppresses stale updates, and
//! upserts/deletes the materialized document store.
//!
//! Grounded on the teacher's `fraiseql_server::observers::runtime::ObserverRuntime`
//! poll loop: a `tokio::select!` between a shutdown signal and
//! `source.next_batch`, per-item processing, and checkpoint/ack only
//! after the downstream write is confirmed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use meridian_observability::{ConsumeStage, ObservabilityPort};
use meridian_persistence::{DeadLetterSink, DocumentStore, PersistenceError};
use meridian_types::{CdcEnvelope, CdcMetadata, MaterializedDocument, StalenessPolicy};
use tokio::sync::Mutex as AsyncMutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::envelope::decode;
use crate::error::{CdcError, CdcResult};
use crate::source::LogSource;

/// Outcome of processing a single envelope, matching spec §4.1's
/// `Ack | Retryable | Fatal` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Applied, skipped-as-stale, or routed to the dead-letter sink —
    /// in every case the offset can advance.
    Ack,
    /// A transient failure; the caller should retry without advancing
    /// the offset.
    Retryable,
}

/// Configuration for the materializer.
#[derive(Debug, Clone)]
pub struct MaterializerConfig {
    /// How a tie in `source_timestamp` is resolved (SPEC_FULL §9 Open
    /// Question: made explicit and configurable).
    pub staleness_policy: StalenessPolicy,
    /// Max records pulled from the source per poll.
    pub batch_size: usize,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            staleness_policy: StalenessPolicy::LessOrEqual,
            batch_size: 100,
        }
    }
}

/// Per-aggregate single-writer materializer (spec §4.1, §5).
pub struct Materializer<S, D, L, O> {
    config: MaterializerConfig,
    source: Arc<S>,
    documents: Arc<D>,
    dead_letters: Arc<L>,
    observability: Arc<O>,
    key_locks: DashMap<Uuid, Arc<AsyncMutex<()>>>,
}

impl<S, D, L, O> Materializer<S, D, L, O>
where
    S: LogSource,
    D: DocumentStore,
    L: DeadLetterSink,
    O: ObservabilityPort,
{
    /// Build a new materializer over the given source, store, dead
    /// letter sink, and observability port.
    pub fn new(
        config: MaterializerConfig,
        source: Arc<S>,
        documents: Arc<D>,
        dead_letters: Arc<L>,
        observability: Arc<O>,
    ) -> Self {
        Self {
            config,
            source,
            documents,
            dead_letters,
            observability,
            key_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, aggregate_id: Uuid) -> Arc<AsyncMutex<()>> {
        self.key_locks
            .entry(aggregate_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Pull and process one batch from the source. Returns the number of
    /// records processed (acked or retried).
    pub async fn poll_once(&self) -> CdcResult<usize> {
        let records = self.source.next_batch(self.config.batch_size).await?;
        let count = records.len();

        for record in records {
            let partition = record.partition;
            let offset = record.offset;

            match self.process_record(&record).await {
                Ok(ProcessOutcome::Ack) => {
                    self.source.ack(partition, offset).await?;
                },
                Ok(ProcessOutcome::Retryable) => {
                    // Do not ack; backpressure upstream per spec §4.1.
                    tracing::warn!(partition, offset, "retryable failure, not acking");
                },
                Err(err) => {
                    tracing::error!(partition, offset, error = %err, "unrecoverable materializer error");
                    return Err(err);
                },
            }
        }

        Ok(count)
    }

    async fn process_record(&self, record: &crate::source::LogRecord) -> CdcResult<ProcessOutcome> {
        // Step 1: tombstone.
        if record.value.is_none() {
            let aggregate_id = match crate::envelope::decode(record) {
                Ok(envelope) => envelope.aggregate_id,
                Err(_) => return Ok(ProcessOutcome::Ack), // undecodable tombstone key: nothing to do
            };
            let span = self
                .observability
                .span_consume(ConsumeStage::Apply, aggregate_id);
            let _guard = span.enter();
            self.observability.record_processed("tombstone", "ignore");
            return Ok(ProcessOutcome::Ack);
        }

        // Step 2: decode.
        let envelope = match decode(record) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.observability.record_error("materializer", "CDC001");
                let placeholder = CdcEnvelope {
                    aggregate_id: Uuid::nil(),
                    operation: meridian_types::Operation::Unknown,
                    deleted: None,
                    source_timestamp: None,
                    key: record.key.clone(),
                    value: record.value.clone(),
                    partition: record.partition,
                    offset: record.offset,
                };
                self.dead_letters
                    .send(&placeholder, &err.to_string())
                    .await
                    .map_err(store_err)?;
                return Ok(ProcessOutcome::Ack);
            },
        };

        self.apply_envelope(envelope).await
    }

    /// Apply one already-decoded envelope, enforcing the per-aggregate
    /// single-writer lock and the staleness guard (spec §4.1 steps 3-7).
    pub async fn apply_envelope(&self, envelope: CdcEnvelope) -> CdcResult<ProcessOutcome> {
        let lock = self.lock_for(envelope.aggregate_id);
        let _guard = lock.lock().await;

        let start = Instant::now();
        let span = self
            .observability
            .span_consume(ConsumeStage::Apply, envelope.aggregate_id);

        let result = async {
            let is_delete = envelope.is_delete();
            let current = self.documents.get(envelope.aggregate_id).await;

            let current = match current {
                Ok(doc) => doc,
                Err(PersistenceError::Transient(reason)) => {
                    return Err(CdcError::StoreTransient { reason })
                },
                Err(other) => return Err(CdcError::StorePermanent { reason: other.to_string() }),
            };

            let new_ts = envelope.effective_timestamp();
            if let Some(existing) = &current {
                let stored_ts = existing.cdc_metadata.source_timestamp;
                if self.config.staleness_policy.is_stale(new_ts, stored_ts) {
                    self.observability.record_processed(
                        if is_delete { "delete" } else { "upsert" },
                        "skip_stale",
                    );
                    return Ok(ProcessOutcome::Ack);
                }
            }

            if is_delete {
                self.documents
                    .delete(envelope.aggregate_id)
                    .await
                    .map_err(store_err)?;
                self.observability.record_db_operation("delete", true);
                self.observability.record_processed("delete", "applied");
            } else {
                let document = MaterializedDocument {
                    id: envelope.aggregate_id,
                    fields: envelope.value.clone().unwrap_or(serde_json::Value::Null),
                    cdc_metadata: CdcMetadata {
                        source_timestamp: envelope.effective_timestamp(),
                        operation: envelope.operation,
                        log_offset: envelope.offset,
                        log_partition: envelope.partition,
                        processed_at: chrono::Utc::now(),
                    },
                };
                self.documents.upsert(&document).await.map_err(store_err)?;
                self.observability.record_db_operation("upsert", true);
                self.observability.record_processed("upsert", "applied");
            }

            Ok(ProcessOutcome::Ack)
        }
        .instrument(span)
        .await;

        self.observability
            .record_latency("materialize", start.elapsed());
        if result.is_err() {
            self.observability.record_db_operation("apply", false);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use meridian_observability::NullObservabilityPort;
    use meridian_persistence::PersistenceError;
    use meridian_types::Operation;
    use serde_json::json;

    use super::*;
    use crate::source::LogRecord;

    #[derive(Default)]
    struct FakeDocumentStore {
        docs: Mutex<HashMap<Uuid, MaterializedDocument>>,
    }

    #[async_trait::async_trait]
    impl DocumentStore for FakeDocumentStore {
        async fn get(&self, aggregate_id: Uuid) -> Result<Option<MaterializedDocument>, PersistenceError> {
            Ok(self.docs.lock().unwrap().get(&aggregate_id).cloned())
        }

        async fn upsert(&self, document: &MaterializedDocument) -> Result<(), PersistenceError> {
            self.docs.lock().unwrap().insert(document.id, document.clone());
            Ok(())
        }

        async fn delete(&self, aggregate_id: Uuid) -> Result<(), PersistenceError> {
            self.docs.lock().unwrap().remove(&aggregate_id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDeadLetterSink {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DeadLetterSink for FakeDeadLetterSink {
        async fn send(&self, _envelope: &CdcEnvelope, reason: &str) -> Result<(), PersistenceError> {
            self.sent.lock().unwrap().push(reason.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLogSource {
        records: Mutex<Vec<LogRecord>>,
        acked: Mutex<Vec<(i32, i64)>>,
    }

    #[async_trait::async_trait]
    impl LogSource for FakeLogSource {
        async fn next_batch(&self, max: usize) -> CdcResult<Vec<LogRecord>> {
            let mut records = self.records.lock().unwrap();
            let take = max.min(records.len());
            Ok(records.drain(..take).collect())
        }

        async fn ack(&self, partition: i32, offset: i64) -> CdcResult<()> {
            self.acked.lock().unwrap().push((partition, offset));
            Ok(())
        }
    }

    fn harness() -> Materializer<FakeLogSource, FakeDocumentStore, FakeDeadLetterSink, NullObservabilityPort> {
        Materializer::new(
            MaterializerConfig::default(),
            Arc::new(FakeLogSource::default()),
            Arc::new(FakeDocumentStore::default()),
            Arc::new(FakeDeadLetterSink::default()),
            Arc::new(NullObservabilityPort),
        )
    }

    fn envelope(id: Uuid, op: Operation, ts: i64, fields: serde_json::Value) -> CdcEnvelope {
        CdcEnvelope {
            aggregate_id: id,
            operation: op,
            deleted: None,
            source_timestamp: Some(ts),
            key: None,
            value: Some(fields),
            partition: 0,
            offset: ts,
        }
    }

    #[tokio::test]
    async fn create_then_delete_removes_the_document() {
        let m = harness();
        let id = Uuid::new_v4();

        m.apply_envelope(envelope(id, Operation::Create, 100, json!({"name": "a"})))
            .await
            .unwrap();
        assert!(m.documents.get(id).await.unwrap().is_some());

        let mut del = envelope(id, Operation::Delete, 200, json!({}));
        del.value = None; // tombstone-shaped delete still carries a decoded envelope here
        del.operation = Operation::Delete;
        m.apply_envelope(del).await.unwrap();

        assert!(m.documents.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn equal_timestamp_update_is_suppressed_as_stale() {
        let m = harness();
        let id = Uuid::new_v4();

        m.apply_envelope(envelope(id, Operation::Create, 100, json!({"name": "a"})))
            .await
            .unwrap();
        m.apply_envelope(envelope(id, Operation::Update, 100, json!({"name": "b"})))
            .await
            .unwrap();

        let doc = m.documents.get(id).await.unwrap().unwrap();
        assert_eq!(doc.fields, json!({"name": "a"}));
    }

    #[tokio::test]
    async fn out_of_order_update_does_not_regress_the_document() {
        let m = harness();
        let id = Uuid::new_v4();

        m.apply_envelope(envelope(id, Operation::Create, 200, json!({"name": "new"})))
            .await
            .unwrap();
        m.apply_envelope(envelope(id, Operation::Update, 100, json!({"name": "old"})))
            .await
            .unwrap();

        let doc = m.documents.get(id).await.unwrap().unwrap();
        assert_eq!(doc.fields, json!({"name": "new"}));
    }

    #[tokio::test]
    async fn newer_update_is_applied() {
        let m = harness();
        let id = Uuid::new_v4();

        m.apply_envelope(envelope(id, Operation::Create, 100, json!({"name": "old"})))
            .await
            .unwrap();
        m.apply_envelope(envelope(id, Operation::Update, 200, json!({"name": "new"})))
            .await
            .unwrap();

        let doc = m.documents.get(id).await.unwrap().unwrap();
        assert_eq!(doc.fields, json!({"name": "new"}));
    }

    #[tokio::test]
    async fn undecodable_record_is_acked_and_dead_lettered() {
        let m = harness();
        let record = LogRecord {
            partition: 0,
            offset: 1,
            key: None,
            value: Some(json!({"op": "c"})),
        };
        let outcome = m.process_record(&record).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Ack);
        assert_eq!(m.dead_letters.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn poll_once_acks_every_processed_record() {
        let id = Uuid::new_v4();
        let source = FakeLogSource {
            records: Mutex::new(vec![LogRecord {
                partition: 0,
                offset: 5,
                key: Some(json!({ "id": id.to_string() })),
                value: Some(json!({
                    "payload": { "op": "c", "after": {"name": "a"}, "source": {"ts_ms": 1} }
                })),
            }]),
            acked: Mutex::new(Vec::new()),
        };

        let m = Materializer::new(
            MaterializerConfig::default(),
            Arc::new(source),
            Arc::new(FakeDocumentStore::default()),
            Arc::new(FakeDeadLetterSink::default()),
            Arc::new(NullObservabilityPort),
        );

        let processed = m.poll_once().await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(*m.source.acked.lock().unwrap(), vec![(0, 5)]);
    }
}

fn store_err(err: PersistenceError) -> CdcError {
    match err {
        PersistenceError::Transient(reason) => CdcError::StoreTransient { reason },
        other => CdcError::StorePermanent { reason: other.to_string() },
    }
}

/// Run the materializer's poll loop until `shutdown` fires, sleeping
/// `idle_delay` between empty polls so it doesn't spin.
pub async fn run_until_shutdown<S, D, L, O>(
    materializer: Arc<Materializer<S, D, L, O>>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    idle_delay: Duration,
) where
    S: LogSource + 'static,
    D: DocumentStore + 'static,
    L: DeadLetterSink + 'static,
    O: ObservabilityPort + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("materializer shutting down");
                    break;
                }
            }
            result = materializer.poll_once() => {
                match result {
                    Ok(0) => tokio::time::sleep(idle_delay).await,
                    Ok(_) => {},
                    Err(err) => {
                        tracing::error!(error = %err, "materializer poll failed");
                        tokio::time::sleep(idle_delay).await;
                    },
                }
            }
        }
    }
}
