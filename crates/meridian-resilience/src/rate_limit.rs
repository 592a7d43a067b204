//! Token-bucket rate limiting (spec §4.9).
//!
//! A single named bucket protects the command surface: 100 token capacity,
//! refilling at 1 token/second, with a zero-duration acquire timeout — a
//! caller either gets a token immediately or is rejected.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Configuration for one named rate limit bucket.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens the bucket can hold.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// How long `acquire` will wait for a token before giving up.
    pub acquire_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_per_sec: 1.0,
            acquire_timeout: Duration::ZERO,
        }
    }
}

struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A single token bucket, shared behind an `Arc` by callers of the same
/// named resource.
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<TokenBucketState>,
}

impl RateLimiter {
    /// Create a new rate limiter, starting with a full bucket.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let state = TokenBucketState {
            tokens: config.capacity,
            last_refill: Instant::now(),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    fn refill(state: &mut TokenBucketState, config: &RateLimitConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * config.refill_per_sec).min(config.capacity);
        state.last_refill = now;
    }

    /// Try to acquire one token, waiting up to `acquire_timeout` for
    /// refill if the bucket is currently empty. Returns `false` if the
    /// timeout elapses with no token available.
    pub async fn acquire(&self) -> bool {
        let deadline = Instant::now() + self.config.acquire_timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                Self::refill(&mut state, &self.config);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return true;
                }
            }

            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Current token count, for observability/testing.
    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        Self::refill(&mut state, &self.config);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_immediately_when_tokens_available() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        assert!(limiter.acquire().await);
    }

    #[tokio::test]
    async fn rejects_when_bucket_is_empty_and_timeout_is_zero() {
        let config = RateLimitConfig {
            capacity: 1.0,
            refill_per_sec: 0.001,
            acquire_timeout: Duration::ZERO,
        };
        let limiter = RateLimiter::new(config);
        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);
    }
}
