//! The eight-step command handler pipeline (spec §4.4), composed with
//! `meridian-resilience`'s `with_resilience` combinator around the I/O
//! phase (load + persist), grounded on angzarr's validate→load→mutate→
//! persist→record sequencing idiom (`services::saga_coord`).

use std::sync::Arc;
use std::time::Instant;

use meridian_error::CommandFailure;
use meridian_observability::ObservabilityPort;
use meridian_persistence::{
    AggregatePersister, IdempotencyStore, OutboxEvent, PersistenceError, ProductRepository,
};
use meridian_resilience::{with_resilience, CircuitBreaker, RateLimiter, ResilienceError, RetryConfig};
use meridian_types::{IdempotencyRecord, Product, ProductStatus};
use uuid::Uuid;

use crate::aggregate::{self, Activate, ChangePrice, CreateProduct, DeleteProduct, Discontinue, UpdateProduct};

/// One of the six intent-level mutations spec §4.3 exposes.
#[derive(Debug, Clone)]
pub enum ProductCommand {
    /// Create a new product.
    Create(CreateProduct),
    /// Full update of mutable, non-price attributes.
    Update { id: Uuid, cmd: UpdateProduct },
    /// Change the price, possibly overriding the large-change guard.
    ChangePrice { id: Uuid, cmd: ChangePrice },
    /// Transition to `ACTIVE`.
    Activate { id: Uuid, cmd: Activate },
    /// Transition to `DISCONTINUED`.
    Discontinue { id: Uuid, cmd: Discontinue },
    /// Soft-delete.
    Delete { id: Uuid, cmd: DeleteProduct },
}

/// A command plus its optional idempotency key (spec §4.4 step 2).
#[derive(Debug, Clone)]
pub struct CommandEnvelope {
    pub idempotency_key: Option<String>,
    pub command: ProductCommand,
}

/// Result of successfully handling a command (spec §4.4 step 8).
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// The command was applied.
    Success {
        aggregate_id: Uuid,
        version: i64,
        status: ProductStatus,
    },
    /// A prior call with the same idempotency key already ran; this is
    /// its recorded result, replayed verbatim.
    AlreadyProcessed { result: serde_json::Value },
}

fn validate(command: &ProductCommand) -> Result<(), CommandFailure> {
    let mut errors = Vec::new();

    if let ProductCommand::Create(cmd) = command {
        if cmd.sku.trim().is_empty() {
            errors.push("sku must not be empty".to_string());
        }
        if cmd.name.trim().is_empty() {
            errors.push("name must not be empty".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CommandFailure::ValidationFailed { errors })
    }
}

fn event_type_for(command: &ProductCommand) -> &'static str {
    match command {
        ProductCommand::Create(_) => "ProductCreated",
        ProductCommand::Update { .. } => "ProductUpdated",
        ProductCommand::ChangePrice { .. } => "ProductPriceChanged",
        ProductCommand::Activate { .. } => "ProductActivated",
        ProductCommand::Discontinue { .. } => "ProductDiscontinued",
        ProductCommand::Delete { .. } => "ProductDeleted",
    }
}

/// Command handler over the repository/persister/idempotency ports,
/// wrapping the I/O phase in the rate-limit → retry → circuit-breaker
/// pipeline from `meridian-resilience` (spec §4.9).
pub struct CommandHandler<R, P, I, O> {
    repo: Arc<R>,
    persister: Arc<P>,
    idempotency: Arc<I>,
    observability: Arc<O>,
    rate_limiter: Arc<RateLimiter>,
    retry_config: RetryConfig,
    breaker: Arc<CircuitBreaker>,
}

impl<R, P, I, O> CommandHandler<R, P, I, O>
where
    R: ProductRepository,
    P: AggregatePersister,
    I: IdempotencyStore,
    O: ObservabilityPort,
{
    /// Build a handler over the given ports and resilience primitives.
    /// Callers typically source the latter three from a shared
    /// [`meridian_resilience::ResilienceRegistry`] keyed `"product_commands"`.
    pub fn new(
        repo: Arc<R>,
        persister: Arc<P>,
        idempotency: Arc<I>,
        observability: Arc<O>,
        rate_limiter: Arc<RateLimiter>,
        retry_config: RetryConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            repo,
            persister,
            idempotency,
            observability,
            rate_limiter,
            retry_config,
            breaker,
        }
    }

    /// Handle one command end to end (spec §4.4). Steps 1 (rate-limit),
    /// and the transient-retry/circuit-breaker wrapping around steps
    /// 2-7, are provided by `with_resilience`; step 1's rejection and the
    /// breaker's rejection both surface before step 2 runs even once.
    pub async fn handle(&self, envelope: CommandEnvelope) -> Result<CommandOutcome, CommandFailure> {
        let start = Instant::now();

        let outcome = with_resilience(
            &self.rate_limiter,
            &self.retry_config,
            &self.breaker,
            |err: &CommandFailure| matches!(err, CommandFailure::ServiceUnavailable { .. }),
            || self.idempotency_then_pipeline(&envelope),
        )
        .await;

        self.observability.record_latency("command_handler", start.elapsed());

        match outcome {
            Ok(result) => {
                self.observability.record_processed("command", "success");
                Ok(result)
            },
            Err(ResilienceError::RateLimited) => {
                Err(CommandFailure::RateLimited { retry_after_secs: 2 })
            },
            Err(ResilienceError::CircuitOpen) => {
                self.observability.record_error("command_handler", "SERVICE_UNAVAILABLE");
                Err(CommandFailure::ServiceUnavailable {
                    reason: "circuit breaker open".into(),
                    retry_after_secs: 15,
                })
            },
            Err(ResilienceError::Operation(failure)) => {
                self.observability.record_error("command_handler", failure_code(&failure));
                Err(failure)
            },
        }
    }

    /// Steps 2-7: idempotency lookup, validate, load, mutate, persist.
    async fn idempotency_then_pipeline(&self, envelope: &CommandEnvelope) -> Result<CommandOutcome, CommandFailure> {
        if let Some(key) = &envelope.idempotency_key {
            match self.idempotency.find(key).await {
                Ok(Some(record)) => {
                    self.observability.record_processed("command", "replayed");
                    return Ok(CommandOutcome::AlreadyProcessed { result: record.result });
                },
                Ok(None) => {},
                Err(_) => {
                    // Transient lookup failure: fall through and attempt the
                    // command normally rather than failing closed on a read.
                },
            }
        }

        validate(&envelope.command)?;
        self.load_apply_persist(envelope).await
    }

    /// Steps 4-7: load, mutate, persist atomically, and hand back the
    /// outbox event's aggregate_id/version/status as the success payload.
    async fn load_apply_persist(&self, envelope: &CommandEnvelope) -> Result<CommandOutcome, CommandFailure> {
        let (is_insert, expected_version, next) = match &envelope.command {
            ProductCommand::Create(cmd) => {
                let sku_taken = self
                    .repo
                    .sku_exists(&cmd.sku, None)
                    .await
                    .map_err(to_command_failure)?;
                let id = Uuid::new_v4();
                let next = aggregate::create(id, cmd, sku_taken)?;
                (true, 0, next)
            },
            ProductCommand::Update { id, cmd } => {
                let current = self.load(*id).await?;
                let next = aggregate::update(&current, cmd)?;
                (false, cmd.expected_version, next)
            },
            ProductCommand::ChangePrice { id, cmd } => {
                let current = self.load(*id).await?;
                let next = aggregate::change_price(&current, cmd)?;
                (false, cmd.expected_version, next)
            },
            ProductCommand::Activate { id, cmd } => {
                let current = self.load(*id).await?;
                let next = aggregate::activate(&current, cmd)?;
                (false, cmd.expected_version, next)
            },
            ProductCommand::Discontinue { id, cmd } => {
                let current = self.load(*id).await?;
                let next = aggregate::discontinue(&current, cmd)?;
                (false, cmd.expected_version, next)
            },
            ProductCommand::Delete { id, cmd } => {
                let current = self.load(*id).await?;
                let next = aggregate::delete(&current, cmd)?;
                (false, cmd.expected_version, next)
            },
        };

        let idempotency_record = envelope.idempotency_key.as_ref().map(|key| IdempotencyRecord {
            key: key.clone(),
            command_type: event_type_for(&envelope.command).to_string(),
            aggregate_id: next.id,
            result: serde_json::json!({
                "aggregateId": next.id,
                "version": next.version,
                "status": next.status,
            }),
            created_at: chrono::Utc::now(),
        });

        let outbox_event = OutboxEvent {
            id: Uuid::new_v4(),
            aggregate_id: next.id,
            event_type: event_type_for(&envelope.command).to_string(),
            payload: serde_json::json!({
                "aggregateId": next.id,
                "version": next.version,
                "status": next.status,
            }),
            occurred_at: chrono::Utc::now(),
        };

        self.persister
            .persist(&next, expected_version, is_insert, idempotency_record.as_ref(), &outbox_event)
            .await
            .map_err(to_command_failure)?;

        Ok(CommandOutcome::Success {
            aggregate_id: next.id,
            version: next.version,
            status: next.status,
        })
    }

    async fn load(&self, id: Uuid) -> Result<Product, CommandFailure> {
        self.repo
            .find_by_id(id)
            .await
            .map_err(to_command_failure)?
            .ok_or_else(|| CommandFailure::ProductNotFound { id: id.to_string() })
    }
}

fn to_command_failure(err: PersistenceError) -> CommandFailure {
    match err {
        PersistenceError::Transient(reason) => CommandFailure::ServiceUnavailable {
            reason,
            retry_after_secs: 15,
        },
        PersistenceError::VersionConflict { expected, found } => CommandFailure::ConcurrentModification {
            expected_version: expected,
            current_version: found,
        },
        PersistenceError::NotFound => CommandFailure::ProductNotFound { id: "unknown".into() },
        PersistenceError::Permanent(reason) => CommandFailure::Internal {
            message: reason,
            correlation_id: Uuid::new_v4().to_string(),
        },
    }
}

fn failure_code(failure: &CommandFailure) -> &'static str {
    match failure {
        CommandFailure::ValidationFailed { .. } => "VALIDATION_FAILED",
        CommandFailure::ProductNotFound { .. } => "PRODUCT_NOT_FOUND",
        CommandFailure::DuplicateSku { .. } => "DUPLICATE_SKU",
        CommandFailure::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
        CommandFailure::ProductDeleted => "PRODUCT_DELETED",
        CommandFailure::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
        CommandFailure::PriceThresholdExceeded { .. } => "PRICE_THRESHOLD_EXCEEDED",
        CommandFailure::InvariantViolation { .. } => "INVARIANT_VIOLATION",
        CommandFailure::RateLimited { .. } => "RATE_LIMITED",
        CommandFailure::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
        CommandFailure::Internal { .. } => "INTERNAL_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use meridian_observability::NullObservabilityPort;
    use meridian_resilience::{CircuitBreakerConfig, RateLimitConfig};

    use super::*;

    #[derive(Default)]
    struct FakeRepo {
        products: Mutex<HashMap<Uuid, Product>>,
        skus: Mutex<HashMap<String, Uuid>>,
    }

    #[async_trait::async_trait]
    impl ProductRepository for FakeRepo {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>, PersistenceError> {
            Ok(self.products.lock().unwrap().get(&id).cloned())
        }

        async fn sku_exists(&self, sku: &str, excluding_id: Option<Uuid>) -> Result<bool, PersistenceError> {
            Ok(self
                .skus
                .lock()
                .unwrap()
                .get(sku)
                .is_some_and(|id| Some(*id) != excluding_id))
        }

        async fn insert(&self, product: &Product) -> Result<(), PersistenceError> {
            self.products.lock().unwrap().insert(product.id, product.clone());
            self.skus.lock().unwrap().insert(product.sku.clone(), product.id);
            Ok(())
        }

        async fn update_cas(&self, product: &Product, expected_version: i64) -> Result<(), PersistenceError> {
            let mut products = self.products.lock().unwrap();
            let current = products.get(&product.id).cloned();
            match current {
                Some(c) if c.version == expected_version => {
                    products.insert(product.id, product.clone());
                    Ok(())
                },
                Some(c) => Err(PersistenceError::VersionConflict {
                    expected: expected_version,
                    found: c.version,
                }),
                None => Err(PersistenceError::NotFound),
            }
        }
    }

    #[derive(Default)]
    struct FakePersister {
        repo: Arc<FakeRepo>,
    }

    #[async_trait::async_trait]
    impl AggregatePersister for FakePersister {
        async fn persist(
            &self,
            product: &Product,
            expected_version: i64,
            is_insert: bool,
            _idempotency: Option<&IdempotencyRecord>,
            _outbox_event: &OutboxEvent,
        ) -> Result<(), PersistenceError> {
            if is_insert {
                self.repo.insert(product).await
            } else {
                self.repo.update_cas(product, expected_version).await
            }
        }
    }

    #[derive(Default)]
    struct FakeIdempotency {
        records: Mutex<HashMap<String, IdempotencyRecord>>,
    }

    #[async_trait::async_trait]
    impl IdempotencyStore for FakeIdempotency {
        async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, PersistenceError> {
            Ok(self.records.lock().unwrap().get(key).cloned())
        }

        async fn record(&self, record: &IdempotencyRecord) -> Result<(), PersistenceError> {
            self.records.lock().unwrap().insert(record.key.clone(), record.clone());
            Ok(())
        }

        async fn sweep_expired(&self, _older_than: chrono::DateTime<chrono::Utc>) -> Result<u64, PersistenceError> {
            Ok(0)
        }
    }

    fn handler() -> (
        Arc<FakeRepo>,
        CommandHandler<FakeRepo, FakePersister, FakeIdempotency, NullObservabilityPort>,
    ) {
        let repo = Arc::new(FakeRepo::default());
        let persister = Arc::new(FakePersister { repo: repo.clone() });
        let idempotency = Arc::new(FakeIdempotency::default());
        let handler = CommandHandler::new(
            repo.clone(),
            persister,
            idempotency,
            Arc::new(NullObservabilityPort),
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
            RetryConfig::default(),
            Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        );
        (repo, handler)
    }

    #[tokio::test]
    async fn create_succeeds_and_assigns_version_one() {
        let (_, handler) = handler();
        let envelope = CommandEnvelope {
            idempotency_key: None,
            command: ProductCommand::Create(CreateProduct {
                sku: "SKU-1".into(),
                name: "Widget".into(),
                description: None,
                price_cents: 1000,
            }),
        };
        let outcome = handler.handle(envelope).await.unwrap();
        assert!(matches!(outcome, CommandOutcome::Success { version: 1, .. }));
    }

    #[tokio::test]
    async fn duplicate_sku_is_rejected() {
        let (_, handler) = handler();
        let cmd = || {
            ProductCommand::Create(CreateProduct {
                sku: "SKU-1".into(),
                name: "Widget".into(),
                description: None,
                price_cents: 1000,
            })
        };
        handler
            .handle(CommandEnvelope { idempotency_key: None, command: cmd() })
            .await
            .unwrap();
        let result = handler
            .handle(CommandEnvelope { idempotency_key: None, command: cmd() })
            .await;
        assert!(matches!(result, Err(CommandFailure::DuplicateSku { .. })));
    }

    #[tokio::test]
    async fn idempotency_key_replays_prior_result() {
        let (_, handler) = handler();
        let envelope = CommandEnvelope {
            idempotency_key: Some("key-1".into()),
            command: ProductCommand::Create(CreateProduct {
                sku: "SKU-1".into(),
                name: "Widget".into(),
                description: None,
                price_cents: 1000,
            }),
        };
        let first = handler.handle(envelope.clone()).await.unwrap();
        assert!(matches!(first, CommandOutcome::Success { .. }));

        // Manually record, since the fake persister doesn't go through
        // the idempotency store (it's a direct repo delegate); exercise
        // the idempotency store path in isolation instead.
        handler
            .idempotency
            .record(&IdempotencyRecord {
                key: "key-1".into(),
                command_type: "ProductCreated".into(),
                aggregate_id: Uuid::new_v4(),
                result: serde_json::json!({"replayed": true}),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let second = handler
            .handle(CommandEnvelope {
                idempotency_key: Some("key-1".into()),
                command: ProductCommand::Create(CreateProduct {
                    sku: "SKU-2".into(),
                    name: "Widget 2".into(),
                    description: None,
                    price_cents: 500,
                }),
            })
            .await
            .unwrap();
        assert!(matches!(second, CommandOutcome::AlreadyProcessed { .. }));
    }

    #[tokio::test]
    async fn concurrent_modification_surfaces_as_command_failure() {
        let (_, handler) = handler();
        handler
            .handle(CommandEnvelope {
                idempotency_key: None,
                command: ProductCommand::Create(CreateProduct {
                    sku: "SKU-1".into(),
                    name: "Widget".into(),
                    description: None,
                    price_cents: 1000,
                }),
            })
            .await
            .unwrap();

        let products: Vec<Product> = handler.repo.products.lock().unwrap().values().cloned().collect();
        let id = products[0].id;

        let result = handler
            .handle(CommandEnvelope {
                idempotency_key: None,
                command: ProductCommand::Update {
                    id,
                    cmd: UpdateProduct {
                        expected_version: 99,
                        name: "New name".into(),
                        description: None,
                    },
                },
            })
            .await;
        assert!(matches!(result, Err(CommandFailure::ConcurrentModification { .. })));
    }
}
