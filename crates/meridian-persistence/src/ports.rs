//! Repository traits (ports) consumed by `meridian-cdc` and
//! `meridian-cqrs`, modeled on the teacher's `fraiseql-runtime::state`
//! injectable-trait pattern (`CacheClient`, `RateLimiter`,
//! `IdempotencyStore`) so both crates can be driven by in-memory fakes in
//! unit tests and by the `postgres` module in production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_types::{
    CdcEnvelope, HistoryEvent, IdempotencyRecord, MaterializedDocument, Order, Product,
    SagaExecution, SagaStepResult,
};
use uuid::Uuid;

/// Errors raised at the persistence boundary. Callers translate these
/// into `CdcError`/`CommandFailure` as appropriate for their context —
/// this type stays storage-agnostic on purpose.
#[derive(Debug, thiserror::Error, Clone)]
pub enum PersistenceError {
    /// The underlying store is reachable but briefly unable to serve
    /// the request (connection reset, statement timeout, deadlock).
    #[error("transient storage error: {0}")]
    Transient(String),
    /// The underlying store rejected the request in a way that will
    /// never succeed on retry (constraint violation, serialization error).
    #[error("storage error: {0}")]
    Permanent(String),
    /// An optimistic-concurrency compare-and-set lost the race.
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict {
        /// Version the caller expected to be current.
        expected: i64,
        /// Version actually stored.
        found: i64,
    },
    /// No row matched the lookup.
    #[error("not found")]
    NotFound,
}

/// CRUD + optimistic-concurrency access to the `products` aggregate table.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Fetch a product by id, including soft-deleted rows (callers
    /// enforce the `deleted` guard themselves per spec §4.3).
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>, PersistenceError>;

    /// `true` if another row already holds this `sku`.
    async fn sku_exists(&self, sku: &str, excluding_id: Option<Uuid>) -> Result<bool, PersistenceError>;

    /// Insert a new product at `version = 1`.
    async fn insert(&self, product: &Product) -> Result<(), PersistenceError>;

    /// Update a product, succeeding only if the stored version still
    /// equals `expected_version` (row-level compare-and-set, spec §4.5).
    async fn update_cas(
        &self,
        product: &Product,
        expected_version: i64,
    ) -> Result<(), PersistenceError>;
}

/// Idempotency key tracking (spec §3, §4.4).
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Look up a previously recorded result for `key`.
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, PersistenceError>;

    /// Record a result for `key`. Implementations must make this atomic
    /// with the aggregate write it accompanies (spec §4.5) — callers in
    /// `meridian-cqrs` invoke this inside the same transaction as
    /// `ProductRepository::update_cas`/`insert`.
    async fn record(&self, record: &IdempotencyRecord) -> Result<(), PersistenceError>;

    /// Remove idempotency records older than `older_than`, returning the
    /// number deleted. Invoked by a periodic sweep (24h TTL, SPEC_FULL §9).
    async fn sweep_expired(&self, older_than: DateTime<Utc>) -> Result<u64, PersistenceError>;
}

/// Order bookkeeping (spec §3): the entity a saga executes on behalf of.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Load an order by id.
    async fn find(&self, id: Uuid) -> Result<Option<Order>, PersistenceError>;

    /// Persist the full current state of an order (status, timestamps).
    async fn save(&self, order: &Order) -> Result<(), PersistenceError>;
}

/// Saga execution bookkeeping (spec §3, §4.6–§4.8).
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Load a saga execution by id.
    async fn find(&self, id: Uuid) -> Result<Option<SagaExecution>, PersistenceError>;

    /// Load the most recent saga execution for an order, if any.
    async fn find_latest_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<SagaExecution>, PersistenceError>;

    /// Insert a new saga execution.
    async fn insert(&self, execution: &SagaExecution) -> Result<(), PersistenceError>;

    /// Persist the full current state of a saga execution (phase,
    /// current_step, completion timestamps).
    async fn save(&self, execution: &SagaExecution) -> Result<(), PersistenceError>;
}

/// Per-step result persistence (spec §4.6).
#[async_trait]
pub trait StepResultRepository: Send + Sync {
    /// All step results for a saga execution, ordered by `step_order`.
    async fn list_for_execution(
        &self,
        saga_execution_id: Uuid,
    ) -> Result<Vec<SagaStepResult>, PersistenceError>;

    /// Insert a new step result row (typically in `PENDING` state).
    async fn insert(&self, result: &SagaStepResult) -> Result<(), PersistenceError>;

    /// Persist the full current state of a step result row.
    async fn save(&self, result: &SagaStepResult) -> Result<(), PersistenceError>;
}

/// Append-only saga history log (spec §3: "History events are immutable
/// and never deleted").
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Append one history event.
    async fn append(&self, event: &HistoryEvent) -> Result<(), PersistenceError>;

    /// All history events for an order, in chronological order.
    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<HistoryEvent>, PersistenceError>;
}

/// Abstract document store the CDC materializer writes to (spec §4.1,
/// §6). Production deployments may back this with a document database or
/// a JSONB column; the trait only assumes last-write-wins semantics keyed
/// by `aggregate_id`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the current materialized document for an aggregate, if any.
    async fn get(&self, aggregate_id: Uuid) -> Result<Option<MaterializedDocument>, PersistenceError>;

    /// Replace (or create) the document for an aggregate in full — no
    /// field-level merging (spec §4.1 step 6).
    async fn upsert(&self, document: &MaterializedDocument) -> Result<(), PersistenceError>;

    /// Remove the document for an aggregate. A no-op if it doesn't exist.
    async fn delete(&self, aggregate_id: Uuid) -> Result<(), PersistenceError>;
}

/// Sink for envelopes that fail permanently (spec §4.1: "Permanent
/// decode/shape errors ... send to dead-letter sink (abstract), ack").
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Record a dead-lettered envelope along with the reason it was
    /// routed here.
    async fn send(&self, envelope: &CdcEnvelope, reason: &str) -> Result<(), PersistenceError>;
}

/// A row written to the transactional outbox describing the state change
/// a command produced (spec §4.4 step 7: "Record an outbound event").
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    /// Event id.
    pub id: Uuid,
    /// Aggregate the event describes.
    pub aggregate_id: Uuid,
    /// Event type discriminator, e.g. `"ProductPriceChanged"`.
    pub event_type: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// When the event was recorded.
    pub occurred_at: DateTime<Utc>,
}

/// Atomic aggregate + idempotency + outbox write (spec §4.5). Kept as its
/// own trait, distinct from [`ProductRepository`], because its single
/// method spans three tables in one transaction — a concern the
/// per-table CRUD traits above don't model.
#[async_trait]
pub trait AggregatePersister: Send + Sync {
    /// Persist `product`, optionally its idempotency record, and the
    /// outbox event as a single atomic unit. `is_insert` selects an
    /// `INSERT` for aggregate creation vs. a CAS update keyed on
    /// `expected_version` otherwise.
    async fn persist(
        &self,
        product: &Product,
        expected_version: i64,
        is_insert: bool,
        idempotency: Option<&IdempotencyRecord>,
        outbox_event: &OutboxEvent,
    ) -> Result<(), PersistenceError>;
}
