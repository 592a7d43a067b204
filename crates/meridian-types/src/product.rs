//! Product aggregate types (CQRS write side).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a [`Product`].
///
/// Transitions: `Draft -> Active`, `Draft -> Discontinued`,
/// `Active -> Discontinued`. `Discontinued` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
    /// Newly created, not yet published.
    Draft,
    /// Published and sellable.
    Active,
    /// Retired; terminal.
    Discontinued,
}

impl ProductStatus {
    /// `true` if transitioning from `self` to `target` is allowed by the
    /// state machine in spec §3.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Draft, Self::Active)
                | (Self::Draft, Self::Discontinued)
                | (Self::Active, Self::Discontinued)
        )
    }
}

/// The product aggregate: `id`, unique `sku`, price, status, and the
/// `version` used for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Stock keeping unit, unique across all products.
    pub sku: String,
    /// Display name.
    pub name: String,
    /// Optional long-form description.
    pub description: Option<String>,
    /// Price in integer cents; never negative.
    pub price_cents: i64,
    /// Current lifecycle status.
    pub status: ProductStatus,
    /// Monotonic version, bumped on every successful mutation.
    pub version: i64,
    /// Soft-delete flag.
    pub deleted: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Fraction by which a price may change on an `ACTIVE` product without
    /// `confirm_large`, per spec §4.3 ("default 20%").
    pub const DEFAULT_PRICE_CHANGE_THRESHOLD: f64 = 0.20;

    /// Relative price change magnitude between `self.price_cents` and
    /// `new_price_cents`, as a fraction (e.g. `0.3` for a 30% change).
    #[must_use]
    pub fn price_change_fraction(&self, new_price_cents: i64) -> f64 {
        if self.price_cents == 0 {
            if new_price_cents == 0 {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            ((new_price_cents - self.price_cents).abs() as f64) / (self.price_cents as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_transitions() {
        assert!(ProductStatus::Draft.can_transition_to(ProductStatus::Active));
        assert!(ProductStatus::Draft.can_transition_to(ProductStatus::Discontinued));
        assert!(ProductStatus::Active.can_transition_to(ProductStatus::Discontinued));
    }

    #[test]
    fn disallowed_transitions() {
        assert!(!ProductStatus::Discontinued.can_transition_to(ProductStatus::Active));
        assert!(!ProductStatus::Active.can_transition_to(ProductStatus::Draft));
        assert!(!ProductStatus::Draft.can_transition_to(ProductStatus::Draft));
    }

    #[test]
    fn price_change_fraction_computes_relative_delta() {
        let p = Product {
            id: Uuid::nil(),
            sku: "SKU-1".into(),
            name: "Widget".into(),
            description: None,
            price_cents: 1000,
            status: ProductStatus::Active,
            version: 1,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!((p.price_change_fraction(1300) - 0.30).abs() < 1e-9);
        assert!((p.price_change_fraction(900) - 0.10).abs() < 1e-9);
    }
}
