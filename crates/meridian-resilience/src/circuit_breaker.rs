//! Sliding-window circuit breaker (spec §4.9), grounded on the teacher's
//! `fraiseql-observers::resilience::CircuitBreaker` three-state machine,
//! generalized from a cumulative-counter sample to a fixed-size sliding
//! window and extended with a slow-call classification.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;

/// Circuit breaker configuration (spec §4.9 defaults).
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of most-recent calls kept in the sliding window.
    pub window_size: usize,
    /// Minimum calls in the window before the failure rate is evaluated.
    pub min_calls: usize,
    /// Fraction of failures-or-slow-calls in the window that trips the breaker.
    pub failure_rate_threshold: f64,
    /// A call taking at least this long counts toward the failure rate.
    pub slow_call_duration: Duration,
    /// How long the breaker stays open before allowing a half-open probe.
    pub open_wait: Duration,
    /// Number of probe calls allowed while half-open.
    pub half_open_probes: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_calls: 5,
            failure_rate_threshold: 0.5,
            slow_call_duration: Duration::from_secs(2),
            open_wait: Duration::from_secs(5),
            half_open_probes: 3,
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through and are recorded.
    Closed,
    /// Calls fail fast without being attempted.
    Open,
    /// A bounded number of probe calls are allowed through.
    HalfOpen,
}

/// Error returned when the breaker refuses a call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("circuit breaker is open")]
pub struct CircuitOpenError;

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Slow,
}

struct Inner {
    state: CircuitState,
    window: VecDeque<Outcome>,
    opened_at: Option<Instant>,
    half_open_remaining: usize,
}

/// A sliding-window circuit breaker guarding one downstream dependency.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a new, closed circuit breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.window_size),
                opened_at: None,
                half_open_remaining: config.half_open_probes,
            }),
            config,
        }
    }

    /// Current state, applying any pending Open → `HalfOpen` transition.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.open_wait {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_remaining = self.config.half_open_probes;
                }
            }
        }
    }

    fn record(&self, inner: &mut Inner, outcome: Outcome) {
        if inner.window.len() == self.config.window_size {
            inner.window.pop_front();
        }
        inner.window.push_back(outcome);

        let total = inner.window.len();
        if total < self.config.min_calls {
            return;
        }
        let bad = inner
            .window
            .iter()
            .filter(|o| matches!(o, Outcome::Failure | Outcome::Slow))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let rate = bad as f64 / total as f64;

        match inner.state {
            CircuitState::Closed if rate >= self.config.failure_rate_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            },
            CircuitState::HalfOpen => {
                if rate >= self.config.failure_rate_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                } else {
                    inner.state = CircuitState::Closed;
                    inner.window.clear();
                }
            },
            _ => {},
        }
    }

    /// Run `f` through the breaker. Rejects immediately with
    /// [`CircuitOpenError`] when open, or when half-open probes are
    /// exhausted.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitCallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().await;
            self.maybe_transition_to_half_open(&mut inner);
            match inner.state {
                CircuitState::Open => return Err(CircuitCallError::Open),
                CircuitState::HalfOpen => {
                    if inner.half_open_remaining == 0 {
                        return Err(CircuitCallError::Open);
                    }
                    inner.half_open_remaining -= 1;
                },
                CircuitState::Closed => {},
            }
        }

        let start = Instant::now();
        let result = f().await;
        let elapsed = start.elapsed();

        let mut inner = self.inner.lock().await;
        match &result {
            Ok(_) if elapsed >= self.config.slow_call_duration => {
                self.record(&mut inner, Outcome::Slow);
            },
            Ok(_) => self.record(&mut inner, Outcome::Success),
            Err(_) => self.record(&mut inner, Outcome::Failure),
        }

        result.map_err(CircuitCallError::Inner)
    }
}

/// Error from [`CircuitBreaker::call`]: either the breaker rejected the
/// call outright, or the inner operation itself failed.
#[derive(Debug, Error)]
pub enum CircuitCallError<E> {
    /// The breaker was open (or half-open with no probes left).
    #[error(transparent)]
    Open(#[from] CircuitOpenError),
    /// The wrapped operation returned an error.
    #[error(transparent)]
    Inner(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: 4,
            min_calls: 2,
            failure_rate_threshold: 0.5,
            slow_call_duration: Duration::from_secs(2),
            open_wait: Duration::from_millis(50),
            half_open_probes: 2,
        }
    }

    #[tokio::test]
    async fn opens_after_failure_rate_exceeds_threshold() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..2 {
            let _: Result<(), CircuitCallError<&str>> =
                breaker.call(|| async { Err("boom") }).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_breaker_fails_fast_without_calling() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..2 {
            let _: Result<(), CircuitCallError<&str>> =
                breaker.call(|| async { Err("boom") }).await;
        }
        let result = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(matches!(result, Err(CircuitCallError::Open(_))));
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_wait_then_closes_on_success() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..2 {
            let _: Result<(), CircuitCallError<&str>> =
                breaker.call(|| async { Err("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        let result = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(result.is_ok());
        let result2 = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(result2.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
