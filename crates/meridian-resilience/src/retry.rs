//! Exponential backoff with full jitter (spec §4.9), grounded on the
//! teacher's `fraiseql-observers::job_queue::backoff::calculate_exponential`
//! formula, extended with jitter and wired to a predicate so the retry
//! orchestrator (spec §4.8) can skip already-completed steps on replay.

use std::time::Duration;

use rand::Rng;

/// Retry configuration: bounded attempts, exponential growth, full jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// `delay = min(initial * multiplier^(attempt-1), max) * U(0, 1)` — full
/// jitter, attempt is 1-based.
#[must_use]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = (attempt.saturating_sub(1)).min(32);
    let growth = config.multiplier.powi(exponent as i32);
    let raw_ms = (config.initial_delay.as_millis() as f64 * growth)
        .min(config.max_delay.as_millis() as f64);
    let jittered_ms = rand::thread_rng().gen_range(0.0..=raw_ms.max(0.0));
    Duration::from_millis(jittered_ms as u64)
}

/// Retry an async operation up to `config.max_attempts` times, sleeping
/// with jittered exponential backoff between attempts. `is_retryable`
/// decides whether a given error should be retried at all; a
/// non-retryable error is returned immediately.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= config.max_attempts || !is_retryable(&err) => return Err(err),
            Err(_) => {
                tokio::time::sleep(backoff_delay(config, attempt)).await;
                attempt += 1;
            },
        }
    }
}
