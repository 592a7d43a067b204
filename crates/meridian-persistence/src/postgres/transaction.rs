//! Transactional boundary for aggregate persistence (spec §4.5), grounded
//! on the teacher's `fraiseql_server::webhooks::transaction::execute_in_transaction`:
//! the aggregate row, the idempotency insert, and the outbox row must
//! commit or roll back together.

use async_trait::async_trait;
use meridian_types::{IdempotencyRecord, Product, ProductStatus};
use sqlx::PgPool;

use crate::ports::{AggregatePersister, OutboxEvent, PersistenceError};

fn status_to_str(status: ProductStatus) -> &'static str {
    match status {
        ProductStatus::Draft => "DRAFT",
        ProductStatus::Active => "ACTIVE",
        ProductStatus::Discontinued => "DISCONTINUED",
    }
}

fn map_err(err: sqlx::Error) -> PersistenceError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => PersistenceError::Transient(err.to_string()),
        _ => PersistenceError::Permanent(err.to_string()),
    }
}

/// Persist a product mutation, an optional idempotency record, and an
/// outbound event as a single atomic unit (spec §4.5). `is_insert`
/// selects an `INSERT` for aggregate creation vs. a CAS `UPDATE` keyed on
/// `expected_version` for everything else. Returns
/// [`PersistenceError::VersionConflict`] if a concurrent writer already
/// advanced the version.
pub async fn persist_product_atomically(
    pool: &PgPool,
    product: &Product,
    expected_version: i64,
    is_insert: bool,
    idempotency: Option<&IdempotencyRecord>,
    outbox_event: &OutboxEvent,
) -> Result<(), PersistenceError> {
    let mut tx = pool.begin().await.map_err(map_err)?;

    if is_insert {
        sqlx::query(
            r"INSERT INTO products
                (id, sku, name, description, price_cents, status, version, deleted,
                 created_at, updated_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price_cents)
        .bind(status_to_str(product.status))
        .bind(product.version)
        .bind(product.deleted)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
    } else {
        let result = sqlx::query(
            r"UPDATE products
              SET name = $1, description = $2, price_cents = $3, status = $4,
                  version = $5, deleted = $6, updated_at = $7
              WHERE id = $8 AND version = $9",
        )
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price_cents)
        .bind(status_to_str(product.status))
        .bind(product.version)
        .bind(product.deleted)
        .bind(product.updated_at)
        .bind(product.id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            let _ = tx.rollback().await;
            let current: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM products WHERE id = $1")
                    .bind(product.id)
                    .fetch_optional(pool)
                    .await
                    .map_err(map_err)?;
            return Err(PersistenceError::VersionConflict {
                expected: expected_version,
                found: current.map_or(expected_version, |(v,)| v),
            });
        }
    }

    if let Some(record) = idempotency {
        sqlx::query(
            r"INSERT INTO idempotency (key, command_type, aggregate_id, result, created_at)
              VALUES ($1, $2, $3, $4, $5)
              ON CONFLICT (key) DO NOTHING",
        )
        .bind(&record.key)
        .bind(&record.command_type)
        .bind(record.aggregate_id)
        .bind(&record.result)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_err)?;
    }

    sqlx::query(
        r"INSERT INTO product_outbox (id, aggregate_id, event_type, payload, occurred_at)
          VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(outbox_event.id)
    .bind(outbox_event.aggregate_id)
    .bind(&outbox_event.event_type)
    .bind(&outbox_event.payload)
    .bind(outbox_event.occurred_at)
    .execute(&mut *tx)
    .await
    .map_err(map_err)?;

    tx.commit().await.map_err(map_err)?;
    Ok(())
}

/// [`AggregatePersister`] backed by [`persist_product_atomically`].
pub struct PostgresAggregatePersister(pub PgPool);

#[async_trait]
impl AggregatePersister for PostgresAggregatePersister {
    async fn persist(
        &self,
        product: &Product,
        expected_version: i64,
        is_insert: bool,
        idempotency: Option<&IdempotencyRecord>,
        outbox_event: &OutboxEvent,
    ) -> Result<(), PersistenceError> {
        persist_product_atomically(
            &self.0,
            product,
            expected_version,
            is_insert,
            idempotency,
            outbox_event,
        )
        .await
    }
}
