//! PostgreSQL-backed `ProductRepository`, grounded on the teacher's
//! `fraiseql-server::observers::repository::ObserverRepository` (plain
//! `sqlx::query_as` against `PgPool`, mapping `sqlx::Error` into a
//! domain error type at the repository boundary).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_types::{Product, ProductStatus};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::ports::{PersistenceError, ProductRepository};

/// Postgres-backed implementation of [`ProductRepository`] against the
/// `products` table defined in `migrations/0001_core_schema.sql`.
pub struct PostgresProductRepository {
    pool: PgPool,
}

impl PostgresProductRepository {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_to_str(status: ProductStatus) -> &'static str {
    match status {
        ProductStatus::Draft => "DRAFT",
        ProductStatus::Active => "ACTIVE",
        ProductStatus::Discontinued => "DISCONTINUED",
    }
}

fn status_from_str(raw: &str) -> ProductStatus {
    match raw {
        "ACTIVE" => ProductStatus::Active,
        "DISCONTINUED" => ProductStatus::Discontinued,
        _ => ProductStatus::Draft,
    }
}

fn row_to_product(row: sqlx::postgres::PgRow) -> Result<Product, PersistenceError> {
    Ok(Product {
        id: row.try_get("id").map_err(map_err)?,
        sku: row.try_get("sku").map_err(map_err)?,
        name: row.try_get("name").map_err(map_err)?,
        description: row.try_get("description").map_err(map_err)?,
        price_cents: row.try_get("price_cents").map_err(map_err)?,
        status: status_from_str(row.try_get::<String, _>("status").map_err(map_err)?.as_str()),
        version: row.try_get("version").map_err(map_err)?,
        deleted: row.try_get("deleted").map_err(map_err)?,
        created_at: row.try_get("created_at").map_err(map_err)?,
        updated_at: row.try_get("updated_at").map_err(map_err)?,
    })
}

fn map_err(err: sqlx::Error) -> PersistenceError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            PersistenceError::Permanent(db_err.to_string())
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => PersistenceError::Transient(err.to_string()),
        _ => PersistenceError::Permanent(err.to_string()),
    }
}

#[async_trait]
impl ProductRepository for PostgresProductRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Product>, PersistenceError> {
        let row = sqlx::query(
            r"SELECT id, sku, name, description, price_cents, status, version, deleted,
                     created_at, updated_at
              FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        row.map(row_to_product).transpose()
    }

    async fn sku_exists(&self, sku: &str, excluding_id: Option<Uuid>) -> Result<bool, PersistenceError> {
        let count: (i64,) = sqlx::query_as(
            r"SELECT COUNT(*) FROM products
              WHERE sku = $1 AND NOT deleted AND ($2::uuid IS NULL OR id != $2)",
        )
        .bind(sku)
        .bind(excluding_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(count.0 > 0)
    }

    async fn insert(&self, product: &Product) -> Result<(), PersistenceError> {
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
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }

    async fn update_cas(
        &self,
        product: &Product,
        expected_version: i64,
    ) -> Result<(), PersistenceError> {
        let updated_at: DateTime<Utc> = Utc::now();
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
        .bind(updated_at)
        .bind(product.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        if result.rows_affected() == 0 {
            let current = self.find_by_id(product.id).await?;
            return Err(PersistenceError::VersionConflict {
                expected: expected_version,
                found: current.map_or(expected_version, |p| p.version),
            });
        }

        Ok(())
    }
}
