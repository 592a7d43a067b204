//! PostgreSQL-backed `DocumentStore` and `DeadLetterSink` (spec §4.1,
//! §6). The materialized document shape is abstract per spec — this
//! implementation keeps it as a JSONB column keyed by `aggregate_id`,
//! matching the "abstract doc store" note without inventing a second
//! database dependency.

use async_trait::async_trait;
use meridian_types::{CdcEnvelope, MaterializedDocument};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::ports::{DeadLetterSink, DocumentStore, PersistenceError};

fn map_err(err: sqlx::Error) -> PersistenceError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => PersistenceError::Transient(err.to_string()),
        _ => PersistenceError::Permanent(err.to_string()),
    }
}

/// Postgres-backed implementation of [`DocumentStore`] against the
/// `materialized_documents` table.
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn get(&self, aggregate_id: Uuid) -> Result<Option<MaterializedDocument>, PersistenceError> {
        let row = sqlx::query(
            r"SELECT aggregate_id, fields, cdc_metadata
              FROM materialized_documents WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        let Some(row) = row else { return Ok(None) };
        let cdc_metadata: serde_json::Value = row.try_get("cdc_metadata").map_err(map_err)?;
        let cdc_metadata = serde_json::from_value(cdc_metadata)
            .map_err(|e| PersistenceError::Permanent(e.to_string()))?;

        Ok(Some(MaterializedDocument {
            id: row.try_get("aggregate_id").map_err(map_err)?,
            fields: row.try_get("fields").map_err(map_err)?,
            cdc_metadata,
        }))
    }

    async fn upsert(&self, document: &MaterializedDocument) -> Result<(), PersistenceError> {
        let cdc_metadata = serde_json::to_value(&document.cdc_metadata)
            .map_err(|e| PersistenceError::Permanent(e.to_string()))?;

        sqlx::query(
            r"INSERT INTO materialized_documents (aggregate_id, fields, cdc_metadata)
              VALUES ($1, $2, $3)
              ON CONFLICT (aggregate_id) DO UPDATE
                SET fields = EXCLUDED.fields, cdc_metadata = EXCLUDED.cdc_metadata",
        )
        .bind(document.id)
        .bind(&document.fields)
        .bind(cdc_metadata)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }

    async fn delete(&self, aggregate_id: Uuid) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM materialized_documents WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;

        Ok(())
    }
}

/// Postgres-backed implementation of [`DeadLetterSink`] against the
/// `cdc_dead_letters` table.
pub struct PostgresDeadLetterSink {
    pool: PgPool,
}

impl PostgresDeadLetterSink {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterSink for PostgresDeadLetterSink {
    async fn send(&self, envelope: &CdcEnvelope, reason: &str) -> Result<(), PersistenceError> {
        let envelope_json =
            serde_json::to_value(envelope).map_err(|e| PersistenceError::Permanent(e.to_string()))?;

        sqlx::query(
            r"INSERT INTO cdc_dead_letters
                (id, aggregate_id, partition, log_offset, reason, envelope, received_at)
              VALUES ($1, $2, $3, $4, $5, $6, now())",
        )
        .bind(Uuid::new_v4())
        .bind(envelope.aggregate_id)
        .bind(envelope.partition)
        .bind(envelope.offset)
        .bind(reason)
        .bind(envelope_json)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }
}
