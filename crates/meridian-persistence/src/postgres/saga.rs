//! PostgreSQL-backed saga bookkeeping: executions, step results, and
//! the append-only history log (spec §3, §4.6–§4.8).

use async_trait::async_trait;
use meridian_types::{
    HistoryEvent, HistoryEventKind, Order, OrderStatus, SagaExecution, SagaPhase, SagaStepResult,
    StepState,
};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::ports::{HistoryRepository, OrderRepository, PersistenceError, SagaRepository, StepResultRepository};

fn map_err(err: sqlx::Error) -> PersistenceError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => PersistenceError::Transient(err.to_string()),
        _ => PersistenceError::Permanent(err.to_string()),
    }
}

fn order_status_to_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "PENDING",
        OrderStatus::Running => "RUNNING",
        OrderStatus::Completed => "COMPLETED",
        OrderStatus::Compensating => "COMPENSATING",
        OrderStatus::Failed => "FAILED",
        OrderStatus::Deleted => "DELETED",
    }
}

fn order_status_from_str(raw: &str) -> OrderStatus {
    match raw {
        "RUNNING" => OrderStatus::Running,
        "COMPLETED" => OrderStatus::Completed,
        "COMPENSATING" => OrderStatus::Compensating,
        "FAILED" => OrderStatus::Failed,
        "DELETED" => OrderStatus::Deleted,
        _ => OrderStatus::Pending,
    }
}

/// Postgres-backed implementation of [`OrderRepository`].
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn find(&self, id: Uuid) -> Result<Option<Order>, PersistenceError> {
        let row = sqlx::query(
            r"SELECT id, status, items, amount_cents, created_at, updated_at
              FROM orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        row.map(|row| {
            Ok(Order {
                id: row.try_get("id").map_err(map_err)?,
                status: order_status_from_str(row.try_get::<String, _>("status").map_err(map_err)?.as_str()),
                items: row.try_get("items").map_err(map_err)?,
                amount_cents: row.try_get("amount_cents").map_err(map_err)?,
                created_at: row.try_get("created_at").map_err(map_err)?,
                updated_at: row.try_get("updated_at").map_err(map_err)?,
            })
        })
        .transpose()
    }

    async fn save(&self, order: &Order) -> Result<(), PersistenceError> {
        sqlx::query(
            r"UPDATE orders
              SET status = $1, items = $2, amount_cents = $3, updated_at = $4
              WHERE id = $5",
        )
        .bind(order_status_to_str(order.status))
        .bind(&order.items)
        .bind(order.amount_cents)
        .bind(order.updated_at)
        .bind(order.id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }
}

fn phase_to_str(phase: SagaPhase) -> &'static str {
    match phase {
        SagaPhase::Running => "RUNNING",
        SagaPhase::Compensating => "COMPENSATING",
        SagaPhase::Completed => "COMPLETED",
        SagaPhase::Failed => "FAILED",
    }
}

fn phase_from_str(raw: &str) -> SagaPhase {
    match raw {
        "COMPENSATING" => SagaPhase::Compensating,
        "COMPLETED" => SagaPhase::Completed,
        "FAILED" => SagaPhase::Failed,
        _ => SagaPhase::Running,
    }
}

fn state_to_str(state: StepState) -> &'static str {
    match state {
        StepState::Pending => "PENDING",
        StepState::InProgress => "IN_PROGRESS",
        StepState::Completed => "COMPLETED",
        StepState::Failed => "FAILED",
        StepState::Skipped => "SKIPPED",
        StepState::Compensated => "COMPENSATED",
    }
}

fn state_from_str(raw: &str) -> StepState {
    match raw {
        "IN_PROGRESS" => StepState::InProgress,
        "COMPLETED" => StepState::Completed,
        "FAILED" => StepState::Failed,
        "SKIPPED" => StepState::Skipped,
        "COMPENSATED" => StepState::Compensated,
        _ => StepState::Pending,
    }
}

fn kind_to_str(kind: HistoryEventKind) -> &'static str {
    match kind {
        HistoryEventKind::StepStarted => "StepStarted",
        HistoryEventKind::StepCompleted => "StepCompleted",
        HistoryEventKind::StepFailed => "StepFailed",
        HistoryEventKind::CompensationStarted => "CompensationStarted",
        HistoryEventKind::StepCompensated => "StepCompensated",
        HistoryEventKind::CompensationFailed => "CompensationFailed",
        HistoryEventKind::SagaFailed => "SagaFailed",
        HistoryEventKind::SagaCompleted => "SagaCompleted",
    }
}

fn kind_from_str(raw: &str) -> HistoryEventKind {
    match raw {
        "StepCompleted" => HistoryEventKind::StepCompleted,
        "StepFailed" => HistoryEventKind::StepFailed,
        "CompensationStarted" => HistoryEventKind::CompensationStarted,
        "StepCompensated" => HistoryEventKind::StepCompensated,
        "CompensationFailed" => HistoryEventKind::CompensationFailed,
        "SagaFailed" => HistoryEventKind::SagaFailed,
        "SagaCompleted" => HistoryEventKind::SagaCompleted,
        _ => HistoryEventKind::StepStarted,
    }
}

/// Postgres-backed implementation of [`SagaRepository`].
pub struct PostgresSagaRepository {
    pool: PgPool,
}

impl PostgresSagaRepository {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_execution(row: sqlx::postgres::PgRow) -> Result<SagaExecution, PersistenceError> {
    Ok(SagaExecution {
        id: row.try_get("id").map_err(map_err)?,
        order_id: row.try_get("order_id").map_err(map_err)?,
        current_step: row.try_get("current_step").map_err(map_err)?,
        phase: phase_from_str(row.try_get::<String, _>("phase").map_err(map_err)?.as_str()),
        started_at: row.try_get("started_at").map_err(map_err)?,
        completed_at: row.try_get("completed_at").map_err(map_err)?,
        compensation_started_at: row.try_get("compensation_started_at").map_err(map_err)?,
    })
}

#[async_trait]
impl SagaRepository for PostgresSagaRepository {
    async fn find(&self, id: Uuid) -> Result<Option<SagaExecution>, PersistenceError> {
        let row = sqlx::query(
            r"SELECT id, order_id, phase, current_step, started_at, completed_at,
                     compensation_started_at
              FROM saga_executions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        row.map(row_to_execution).transpose()
    }

    async fn find_latest_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<SagaExecution>, PersistenceError> {
        let row = sqlx::query(
            r"SELECT id, order_id, phase, current_step, started_at, completed_at,
                     compensation_started_at
              FROM saga_executions WHERE order_id = $1
              ORDER BY started_at DESC LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;

        row.map(row_to_execution).transpose()
    }

    async fn insert(&self, execution: &SagaExecution) -> Result<(), PersistenceError> {
        sqlx::query(
            r"INSERT INTO saga_executions
                (id, order_id, phase, current_step, started_at, completed_at,
                 compensation_started_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(execution.id)
        .bind(execution.order_id)
        .bind(phase_to_str(execution.phase))
        .bind(execution.current_step)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.compensation_started_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }

    async fn save(&self, execution: &SagaExecution) -> Result<(), PersistenceError> {
        sqlx::query(
            r"UPDATE saga_executions
              SET phase = $1, current_step = $2, completed_at = $3,
                  compensation_started_at = $4
              WHERE id = $5",
        )
        .bind(phase_to_str(execution.phase))
        .bind(execution.current_step)
        .bind(execution.completed_at)
        .bind(execution.compensation_started_at)
        .bind(execution.id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }
}

/// Postgres-backed implementation of [`StepResultRepository`].
pub struct PostgresStepResultRepository {
    pool: PgPool,
}

impl PostgresStepResultRepository {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_step_result(row: sqlx::postgres::PgRow) -> Result<SagaStepResult, PersistenceError> {
    Ok(SagaStepResult {
        id: row.try_get("id").map_err(map_err)?,
        saga_execution_id: row.try_get("saga_execution_id").map_err(map_err)?,
        step_name: row.try_get("step_name").map_err(map_err)?,
        step_order: row.try_get("step_order").map_err(map_err)?,
        state: state_from_str(row.try_get::<String, _>("state").map_err(map_err)?.as_str()),
        payload: row.try_get("payload").map_err(map_err)?,
        error_message: row.try_get("error_message").map_err(map_err)?,
        started_at: row.try_get("started_at").map_err(map_err)?,
        ended_at: row.try_get("ended_at").map_err(map_err)?,
    })
}

#[async_trait]
impl StepResultRepository for PostgresStepResultRepository {
    async fn list_for_execution(
        &self,
        saga_execution_id: Uuid,
    ) -> Result<Vec<SagaStepResult>, PersistenceError> {
        let rows = sqlx::query(
            r"SELECT id, saga_execution_id, step_name, step_order, state, payload,
                     error_message, started_at, ended_at
              FROM saga_step_results WHERE saga_execution_id = $1
              ORDER BY step_order ASC",
        )
        .bind(saga_execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.into_iter().map(row_to_step_result).collect()
    }

    async fn insert(&self, result: &SagaStepResult) -> Result<(), PersistenceError> {
        sqlx::query(
            r"INSERT INTO saga_step_results
                (id, saga_execution_id, step_name, step_order, state, payload,
                 error_message, started_at, ended_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(result.id)
        .bind(result.saga_execution_id)
        .bind(&result.step_name)
        .bind(result.step_order)
        .bind(state_to_str(result.state))
        .bind(&result.payload)
        .bind(&result.error_message)
        .bind(result.started_at)
        .bind(result.ended_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }

    async fn save(&self, result: &SagaStepResult) -> Result<(), PersistenceError> {
        sqlx::query(
            r"UPDATE saga_step_results
              SET state = $1, payload = $2, error_message = $3, started_at = $4, ended_at = $5
              WHERE id = $6",
        )
        .bind(state_to_str(result.state))
        .bind(&result.payload)
        .bind(&result.error_message)
        .bind(result.started_at)
        .bind(result.ended_at)
        .bind(result.id)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }
}

/// Postgres-backed implementation of [`HistoryRepository`].
pub struct PostgresHistoryRepository {
    pool: PgPool,
}

impl PostgresHistoryRepository {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryRepository for PostgresHistoryRepository {
    async fn append(&self, event: &HistoryEvent) -> Result<(), PersistenceError> {
        sqlx::query(
            r"INSERT INTO saga_history
                (id, order_id, saga_execution_id, kind, step_name, payload, error, at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(event.id)
        .bind(event.order_id)
        .bind(event.saga_execution_id)
        .bind(kind_to_str(event.kind))
        .bind(&event.step_name)
        .bind(&event.payload)
        .bind(&event.error)
        .bind(event.at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;

        Ok(())
    }

    async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<HistoryEvent>, PersistenceError> {
        let rows = sqlx::query(
            r"SELECT id, order_id, saga_execution_id, kind, step_name, payload, error, at
              FROM saga_history WHERE order_id = $1 ORDER BY at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;

        rows.into_iter()
            .map(|row| {
                Ok(HistoryEvent {
                    id: row.try_get("id").map_err(map_err)?,
                    order_id: row.try_get("order_id").map_err(map_err)?,
                    saga_execution_id: row.try_get("saga_execution_id").map_err(map_err)?,
                    kind: kind_from_str(row.try_get::<String, _>("kind").map_err(map_err)?.as_str()),
                    step_name: row.try_get("step_name").map_err(map_err)?,
                    payload: row.try_get("payload").map_err(map_err)?,
                    error: row.try_get("error").map_err(map_err)?,
                    at: row.try_get("at").map_err(map_err)?,
                })
            })
            .collect()
    }
}
