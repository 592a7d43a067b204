//! PostgreSQL-backed `IdempotencyStore` (spec §3, §4.4, §4.5).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_types::IdempotencyRecord;
use sqlx::{PgPool, Row};

use crate::ports::{IdempotencyStore, PersistenceError};

/// Postgres-backed implementation against the `idempotency` table.
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_err(err: sqlx::Error) -> PersistenceError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => PersistenceError::Transient(err.to_string()),
        _ => PersistenceError::Permanent(err.to_string()),
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, PersistenceError> {
        let row = sqlx::query(
            r"SELECT key, command_type, aggregate_id, result, created_at
              FROM idempotency WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(IdempotencyRecord {
            key: row.try_get("key").map_err(map_err)?,
            command_type: row.try_get("command_type").map_err(map_err)?,
            aggregate_id: row.try_get("aggregate_id").map_err(map_err)?,
            result: row.try_get("result").map_err(map_err)?,
            created_at: row.try_get("created_at").map_err(map_err)?,
        }))
    }

    async fn record(&self, record: &IdempotencyRecord) -> Result<(), PersistenceError> {
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
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }

    async fn sweep_expired(&self, older_than: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let result = sqlx::query("DELETE FROM idempotency WHERE created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(result.rows_affected())
    }
}
