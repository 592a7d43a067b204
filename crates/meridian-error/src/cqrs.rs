//! Command-side error taxonomy (spec §7).

use thiserror::Error;

/// Every way a command against the product aggregate can fail, mapped
/// 1:1 onto the taxonomy in spec §7.
#[derive(Debug, Error, Clone)]
pub enum CommandFailure {
    /// Field-level validation failed before the aggregate was touched.
    #[error("validation failed: {errors:?}")]
    ValidationFailed {
        /// Field-level error messages.
        errors: Vec<String>,
    },

    /// No product exists with the given id.
    #[error("product not found: {id}")]
    ProductNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// The requested `sku` already belongs to another product.
    #[error("duplicate sku: {sku}")]
    DuplicateSku {
        /// The conflicting SKU.
        sku: String,
    },

    /// `expected_version` did not match the aggregate's current version.
    #[error("concurrent modification: expected {expected_version}, current {current_version}")]
    ConcurrentModification {
        /// Version the caller expected.
        expected_version: i64,
        /// Version the aggregate actually has.
        current_version: i64,
    },

    /// The aggregate has been soft-deleted.
    #[error("product deleted")]
    ProductDeleted,

    /// The requested status transition is not in the allowed set.
    #[error("invalid state transition: {current_status} -> {target_status}")]
    InvalidStateTransition {
        /// Status the aggregate is currently in.
        current_status: String,
        /// Status the caller asked to transition to.
        target_status: String,
    },

    /// A price change exceeded the configured threshold without `confirm_large`.
    #[error("price threshold exceeded: {change_fraction} > {threshold_fraction}")]
    PriceThresholdExceeded {
        /// Current price in cents.
        current_price_cents: i64,
        /// Requested price in cents.
        requested_price_cents: i64,
        /// Relative change, as a fraction.
        change_fraction: f64,
        /// Configured threshold, as a fraction.
        threshold_fraction: f64,
    },

    /// An aggregate-level invariant was violated (e.g. negative price).
    #[error("invariant violated: {invariant}")]
    InvariantViolation {
        /// Name of the violated invariant.
        invariant: String,
    },

    /// The rate limiter rejected the request.
    #[error("rate limited")]
    RateLimited {
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },

    /// The circuit breaker is open, or a dependency is otherwise unavailable.
    #[error("service unavailable: {reason}")]
    ServiceUnavailable {
        /// Human-readable reason.
        reason: String,
        /// Seconds the caller should wait before retrying.
        retry_after_secs: u64,
    },

    /// An unexpected internal failure, carrying a correlation id for
    /// cross-referencing logs and traces (spec §7 propagation policy).
    #[error("internal error (correlation_id={correlation_id}): {message}")]
    Internal {
        /// Opaque diagnostic message, safe to surface.
        message: String,
        /// Correlation id shared with the trace and log lines.
        correlation_id: String,
    },
}

/// Transient/retryable classification, independent of the enumerated
/// command failure kinds — used by `meridian-resilience`'s retry
/// primitive to decide whether a raised error is one of the "enumerated
/// transient kinds" in spec §4.9 (I/O error, timeout, transient-data-access
/// error). `CommandFailure` itself never carries a transient variant: by
/// the time a command handler surfaces `CommandFailure`, retries (if any)
/// have already been exhausted or bypassed.
impl CommandFailure {
    /// `true` if this failure should never be retried silently, i.e. it
    /// must be surfaced to the caller as-is (spec §7 propagation policy:
    /// "Invariants and state-machine failures are surfaced unchanged").
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::ServiceUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_unavailable_is_not_terminal() {
        let err = CommandFailure::ServiceUnavailable {
            reason: "breaker open".into(),
            retry_after_secs: 15,
        };
        assert!(!err.is_terminal());
    }

    #[test]
    fn invariant_violation_is_terminal() {
        let err = CommandFailure::InvariantViolation {
            invariant: "price_cents >= 0".into(),
        };
        assert!(err.is_terminal());
    }
}
