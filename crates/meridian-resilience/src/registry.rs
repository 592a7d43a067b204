//! Named registry of resilience primitives, grounded on the teacher's
//! `fraiseql-runtime::state::AppState` pattern of holding shared,
//! `Arc`-wrapped cross-cutting services keyed by name rather than one
//! instance per call site.

use std::sync::Arc;

use dashmap::DashMap;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::retry::RetryConfig;

/// Holds one named instance of each resilience primitive per logical
/// resource (e.g. `"command-handler"`, `"document-store"`), so the same
/// breaker/limiter state is shared across every call site that protects
/// the same dependency.
#[derive(Default)]
pub struct ResilienceRegistry {
    rate_limiters: DashMap<String, Arc<RateLimiter>>,
    circuit_breakers: DashMap<String, Arc<CircuitBreaker>>,
    retry_configs: DashMap<String, RetryConfig>,
}

impl ResilienceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the named rate limiter, using `default_config` if
    /// this is the first lookup for `name`.
    pub fn rate_limiter(&self, name: &str, default_config: RateLimitConfig) -> Arc<RateLimiter> {
        self.rate_limiters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(default_config)))
            .clone()
    }

    /// Fetch or create the named circuit breaker.
    pub fn circuit_breaker(
        &self,
        name: &str,
        default_config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        self.circuit_breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(default_config)))
            .clone()
    }

    /// Fetch or set the named retry configuration.
    pub fn retry_config(&self, name: &str, default_config: RetryConfig) -> RetryConfig {
        self.retry_configs
            .entry(name.to_string())
            .or_insert(default_config)
            .clone()
    }
}
