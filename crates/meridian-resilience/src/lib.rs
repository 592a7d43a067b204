//! Resilience primitives for the Meridian core: rate limiting, retry with
//! backoff, and circuit breaking (spec §4.9), composed as
//! `with_rate_limit(with_retry(with_circuit_breaker(f)))`.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitCallError, CircuitState};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use registry::ResilienceRegistry;
pub use retry::{backoff_delay, retry_with_backoff, RetryConfig};

use thiserror::Error;

/// Unified error from the composed `with_resilience` pipeline.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The rate limiter rejected the call before it was attempted.
    #[error("rate limit exceeded")]
    RateLimited,
    /// The circuit breaker was open (or half-open with no probes left).
    #[error("circuit breaker is open")]
    CircuitOpen,
    /// The wrapped operation itself failed, after exhausting retries.
    #[error(transparent)]
    Operation(E),
}

/// Runs `operation` through the three resilience layers in order:
/// rate limit → retry-with-backoff → circuit breaker. A request that is
/// rate-limited never reaches the breaker or consumes a retry attempt;
/// each retry attempt is itself protected by the breaker, so a breaker
/// trip during retries surfaces immediately rather than being retried
/// into exhaustion.
pub async fn with_resilience<T, E, F, Fut>(
    limiter: &RateLimiter,
    retry_config: &RetryConfig,
    breaker: &CircuitBreaker,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    if !limiter.acquire().await {
        return Err(ResilienceError::RateLimited);
    }

    let mut breaker_open = false;
    let result = retry_with_backoff(
        retry_config,
        |err: &ResilienceError<E>| match err {
            ResilienceError::CircuitOpen => false,
            ResilienceError::Operation(inner) => is_retryable(inner),
            ResilienceError::RateLimited => false,
        },
        || {
            let fut = operation();
            async {
                match breaker.call(|| fut).await {
                    Ok(value) => Ok(value),
                    Err(CircuitCallError::Open(_)) => {
                        breaker_open = true;
                        Err(ResilienceError::CircuitOpen)
                    },
                    Err(CircuitCallError::Inner(err)) => Err(ResilienceError::Operation(err)),
                }
            }
        },
    )
    .await;

    if breaker_open {
        return Err(ResilienceError::CircuitOpen);
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn succeeds_when_everything_is_healthy() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let retry_config = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

        let result: Result<u32, ResilienceError<&str>> = with_resilience(
            &limiter,
            &retry_config,
            &breaker,
            |_| true,
            || async { Ok::<_, &str>(7) },
        )
        .await;

        assert!(matches!(result, Ok(7)));
    }

    #[tokio::test]
    async fn rate_limited_call_never_touches_the_operation() {
        let limiter = RateLimiter::new(RateLimitConfig {
            capacity: 1.0,
            refill_per_sec: 0.001,
            acquire_timeout: Duration::ZERO,
        });
        let retry_config = RetryConfig::default();
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

        assert!(limiter.acquire().await); // drain the single token
        let calls = AtomicU32::new(0);

        let result: Result<u32, ResilienceError<&str>> = with_resilience(
            &limiter,
            &retry_config,
            &breaker,
            |_| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, &str>(1) }
            },
        )
        .await;

        assert!(matches!(result, Err(ResilienceError::RateLimited)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
