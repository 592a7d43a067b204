//! Shared application state, grounded on
//! `fraiseql-runtime::state::AppState`'s pattern of one struct holding the
//! database pool plus injectable cross-cutting services — generalized
//! here to hold the concrete Postgres-backed command handler instead of
//! GraphQL-specific cache/auth components.

use std::sync::Arc;

use meridian_cqrs::CommandHandler;
use meridian_observability::TracingMetricsObservability;
use meridian_persistence::postgres::{PostgresAggregatePersister, PostgresIdempotencyStore, PostgresProductRepository};
use meridian_resilience::{CircuitBreakerConfig, RateLimitConfig, ResilienceRegistry, RetryConfig};
use sqlx::PgPool;

use crate::config::ServerConfig;
use crate::lifecycle::ShutdownCoordinator;

/// The concrete command handler this server drives: real Postgres
/// repositories and persister, tracing/metrics observability.
pub type ProductCommandHandler =
    CommandHandler<PostgresProductRepository, PostgresAggregatePersister, PostgresIdempotencyStore, TracingMetricsObservability>;

/// Name under which the product command path's resilience primitives
/// are registered in `AppState`'s [`ResilienceRegistry`].
const PRODUCT_COMMANDS: &str = "product-commands";

/// Shared state injected into every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<ProductCommandHandler>,
    pub db: PgPool,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub resilience: Arc<ResilienceRegistry>,
}

impl AppState {
    /// Build state from a connected pool and loaded config. Resilience
    /// primitives are fetched from a shared [`ResilienceRegistry`] by
    /// name rather than constructed directly, so any future caller that
    /// protects the same named resource (e.g. a second handler guarding
    /// `"product-commands"`) reuses the same limiter/breaker state
    /// instead of tracking its own.
    #[must_use]
    pub fn new(db: PgPool, config: &ServerConfig, shutdown: Arc<ShutdownCoordinator>) -> Self {
        let repo = Arc::new(PostgresProductRepository::new(db.clone()));
        let persister = Arc::new(PostgresAggregatePersister(db.clone()));
        let idempotency = Arc::new(PostgresIdempotencyStore::new(db.clone()));
        let observability = Arc::new(TracingMetricsObservability);

        let resilience = Arc::new(ResilienceRegistry::new());

        let rate_limiter = resilience.rate_limiter(
            PRODUCT_COMMANDS,
            RateLimitConfig {
                capacity: config.rate_limit.capacity,
                refill_per_sec: config.rate_limit.refill_per_sec,
                acquire_timeout: std::time::Duration::ZERO,
            },
        );
        let retry_config = resilience.retry_config(
            PRODUCT_COMMANDS,
            RetryConfig {
                max_attempts: config.retry.max_attempts,
                initial_delay: std::time::Duration::from_millis(config.retry.initial_delay_ms),
                multiplier: config.retry.multiplier,
                max_delay: std::time::Duration::from_millis(config.retry.max_delay_ms),
            },
        );
        let breaker = resilience.circuit_breaker(
            PRODUCT_COMMANDS,
            CircuitBreakerConfig {
                window_size: config.circuit_breaker.window_size,
                min_calls: config.circuit_breaker.min_calls,
                failure_rate_threshold: config.circuit_breaker.failure_rate_threshold,
                slow_call_duration: std::time::Duration::from_secs(config.circuit_breaker.slow_call_duration_secs),
                open_wait: std::time::Duration::from_secs(config.circuit_breaker.open_wait_secs),
                half_open_probes: config.circuit_breaker.half_open_probes,
            },
        );

        let handler = Arc::new(CommandHandler::new(
            repo,
            persister,
            idempotency,
            observability,
            rate_limiter,
            retry_config,
            breaker,
        ));

        Self { handler, db, shutdown, resilience }
    }
}
