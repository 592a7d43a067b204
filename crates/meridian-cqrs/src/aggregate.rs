//! Pure Product aggregate mutations and the invariant table of spec §4.3.
//!
//! Every function here is a pure function of its inputs: no I/O, no
//! clock reads beyond `Utc::now()` for the timestamp fields. The
//! command handler (`command_handler.rs`) is the only caller and owns
//! all I/O around these calls.

use chrono::Utc;
use meridian_error::CommandFailure;
use meridian_types::{Product, ProductStatus};
use uuid::Uuid;

/// Fields for creating a new product.
#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
}

/// Fields for a full update of mutable attributes (price is changed via
/// [`ChangePrice`] so the threshold guard applies uniformly).
#[derive(Debug, Clone)]
pub struct UpdateProduct {
    pub expected_version: i64,
    pub name: String,
    pub description: Option<String>,
}

/// A price change, with the caller's explicit override of the large-change guard.
#[derive(Debug, Clone)]
pub struct ChangePrice {
    pub expected_version: i64,
    pub price_cents: i64,
    pub confirm_large: bool,
}

/// Transition to `ACTIVE`.
#[derive(Debug, Clone)]
pub struct Activate {
    pub expected_version: i64,
}

/// Transition to `DISCONTINUED`.
#[derive(Debug, Clone)]
pub struct Discontinue {
    pub expected_version: i64,
    pub reason: Option<String>,
}

/// Soft-delete.
#[derive(Debug, Clone)]
pub struct DeleteProduct {
    pub expected_version: i64,
    pub deleted_by: Option<String>,
}

fn guard_live_and_current(current: &Product, expected_version: i64) -> Result<(), CommandFailure> {
    if current.deleted {
        return Err(CommandFailure::ProductDeleted);
    }
    if current.version != expected_version {
        return Err(CommandFailure::ConcurrentModification {
            expected_version,
            current_version: current.version,
        });
    }
    Ok(())
}

/// Build a brand-new product at version 1. The caller is responsible for
/// the `sku unique` guard (`sku_taken`) since it requires a repository
/// lookup.
pub fn create(id: Uuid, cmd: &CreateProduct, sku_taken: bool) -> Result<Product, CommandFailure> {
    if sku_taken {
        return Err(CommandFailure::DuplicateSku {
            sku: cmd.sku.clone(),
        });
    }
    if cmd.price_cents < 0 {
        return Err(CommandFailure::InvariantViolation {
            invariant: "price_cents >= 0".into(),
        });
    }

    let now = Utc::now();
    Ok(Product {
        id,
        sku: cmd.sku.clone(),
        name: cmd.name.clone(),
        description: cmd.description.clone(),
        price_cents: cmd.price_cents,
        status: ProductStatus::Draft,
        version: 1,
        deleted: false,
        created_at: now,
        updated_at: now,
    })
}

/// Apply a non-price update to `current`, returning the new aggregate state.
pub fn update(current: &Product, cmd: &UpdateProduct) -> Result<Product, CommandFailure> {
    guard_live_and_current(current, cmd.expected_version)?;

    let mut next = current.clone();
    next.name = cmd.name.clone();
    next.description = cmd.description.clone();
    next.version += 1;
    next.updated_at = Utc::now();
    Ok(next)
}

/// Apply a price change, enforcing the threshold guard on `ACTIVE` products.
pub fn change_price(current: &Product, cmd: &ChangePrice) -> Result<Product, CommandFailure> {
    guard_live_and_current(current, cmd.expected_version)?;

    if cmd.price_cents < 0 {
        return Err(CommandFailure::InvariantViolation {
            invariant: "price_cents >= 0".into(),
        });
    }

    if current.status == ProductStatus::Active && !cmd.confirm_large {
        let change_fraction = current.price_change_fraction(cmd.price_cents);
        if change_fraction > Product::DEFAULT_PRICE_CHANGE_THRESHOLD {
            return Err(CommandFailure::PriceThresholdExceeded {
                current_price_cents: current.price_cents,
                requested_price_cents: cmd.price_cents,
                change_fraction,
                threshold_fraction: Product::DEFAULT_PRICE_CHANGE_THRESHOLD,
            });
        }
    }

    let mut next = current.clone();
    next.price_cents = cmd.price_cents;
    next.version += 1;
    next.updated_at = Utc::now();
    Ok(next)
}

fn transition(current: &Product, cmd_expected_version: i64, target: ProductStatus) -> Result<Product, CommandFailure> {
    guard_live_and_current(current, cmd_expected_version)?;

    if !current.status.can_transition_to(target) {
        return Err(CommandFailure::InvalidStateTransition {
            current_status: format!("{:?}", current.status).to_uppercase(),
            target_status: format!("{target:?}").to_uppercase(),
        });
    }

    let mut next = current.clone();
    next.status = target;
    next.version += 1;
    next.updated_at = Utc::now();
    Ok(next)
}

/// Transition `current` to `ACTIVE`.
pub fn activate(current: &Product, cmd: &Activate) -> Result<Product, CommandFailure> {
    transition(current, cmd.expected_version, ProductStatus::Active)
}

/// Transition `current` to `DISCONTINUED`. `reason` is accepted for the
/// outbound event/history record; the aggregate itself carries no reason field.
pub fn discontinue(current: &Product, cmd: &Discontinue) -> Result<Product, CommandFailure> {
    let _ = &cmd.reason;
    transition(current, cmd.expected_version, ProductStatus::Discontinued)
}

/// Soft-delete `current`.
pub fn delete(current: &Product, cmd: &DeleteProduct) -> Result<Product, CommandFailure> {
    guard_live_and_current(current, cmd.expected_version)?;

    let _ = &cmd.deleted_by;
    let mut next = current.clone();
    next.deleted = true;
    next.version += 1;
    next.updated_at = Utc::now();
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(version: i64) -> Product {
        Product {
            id: Uuid::nil(),
            sku: "SKU-1".into(),
            name: "Widget".into(),
            description: None,
            price_cents: 1000,
            status: ProductStatus::Draft,
            version,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn create_rejects_duplicate_sku() {
        let cmd = CreateProduct {
            sku: "SKU-1".into(),
            name: "Widget".into(),
            description: None,
            price_cents: 1000,
        };
        let result = create(Uuid::new_v4(), &cmd, true);
        assert!(matches!(result, Err(CommandFailure::DuplicateSku { .. })));
    }

    #[test]
    fn create_rejects_negative_price() {
        let cmd = CreateProduct {
            sku: "SKU-1".into(),
            name: "Widget".into(),
            description: None,
            price_cents: -1,
        };
        let result = create(Uuid::new_v4(), &cmd, false);
        assert!(matches!(result, Err(CommandFailure::InvariantViolation { .. })));
    }

    #[test]
    fn update_rejects_stale_version() {
        let current = draft(5);
        let cmd = UpdateProduct {
            expected_version: 4,
            name: "New name".into(),
            description: None,
        };
        let result = update(&current, &cmd);
        assert!(matches!(
            result,
            Err(CommandFailure::ConcurrentModification { expected_version: 4, current_version: 5 })
        ));
    }

    #[test]
    fn update_rejects_deleted_aggregate() {
        let mut current = draft(1);
        current.deleted = true;
        let cmd = UpdateProduct {
            expected_version: 1,
            name: "New name".into(),
            description: None,
        };
        assert!(matches!(update(&current, &cmd), Err(CommandFailure::ProductDeleted)));
    }

    #[test]
    fn activate_allows_draft_to_active() {
        let current = draft(1);
        let cmd = Activate { expected_version: 1 };
        let next = activate(&current, &cmd).unwrap();
        assert_eq!(next.status, ProductStatus::Active);
        assert_eq!(next.version, 2);
    }

    #[test]
    fn activate_rejects_from_discontinued() {
        let mut current = draft(1);
        current.status = ProductStatus::Discontinued;
        let cmd = Activate { expected_version: 1 };
        assert!(matches!(
            activate(&current, &cmd),
            Err(CommandFailure::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn price_change_within_threshold_on_active_product_is_allowed() {
        let mut current = draft(1);
        current.status = ProductStatus::Active;
        let cmd = ChangePrice {
            expected_version: 1,
            price_cents: 1100, // 10% change
            confirm_large: false,
        };
        let next = change_price(&current, &cmd).unwrap();
        assert_eq!(next.price_cents, 1100);
    }

    #[test]
    fn price_change_beyond_threshold_requires_confirm_large() {
        let mut current = draft(1);
        current.status = ProductStatus::Active;
        let cmd = ChangePrice {
            expected_version: 1,
            price_cents: 2000, // 100% change
            confirm_large: false,
        };
        assert!(matches!(
            change_price(&current, &cmd),
            Err(CommandFailure::PriceThresholdExceeded { .. })
        ));
    }

    #[test]
    fn price_change_beyond_threshold_with_confirm_large_succeeds() {
        let mut current = draft(1);
        current.status = ProductStatus::Active;
        let cmd = ChangePrice {
            expected_version: 1,
            price_cents: 2000,
            confirm_large: true,
        };
        let next = change_price(&current, &cmd).unwrap();
        assert_eq!(next.price_cents, 2000);
    }

    #[test]
    fn price_change_on_draft_product_ignores_threshold() {
        let current = draft(1); // status == Draft
        let cmd = ChangePrice {
            expected_version: 1,
            price_cents: 9999,
            confirm_large: false,
        };
        let next = change_price(&current, &cmd).unwrap();
        assert_eq!(next.price_cents, 9999);
    }

    #[test]
    fn delete_soft_deletes_and_bumps_version() {
        let current = draft(1);
        let cmd = DeleteProduct {
            expected_version: 1,
            deleted_by: Some("operator@example.com".into()),
        };
        let next = delete(&current, &cmd).unwrap();
        assert!(next.deleted);
        assert_eq!(next.version, 2);
    }
}
