//! Saga/order types: orders, saga executions, step results, and history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of an [`Order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, saga not yet started.
    Pending,
    /// Saga steps executing.
    Running,
    /// All steps completed successfully.
    Completed,
    /// A step failed; compensation in progress.
    Compensating,
    /// Saga failed and compensation (if any) has concluded.
    Failed,
    /// Order was deleted.
    Deleted,
}

/// An order that a saga executes on behalf of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: Uuid,
    /// Current order status.
    pub status: OrderStatus,
    /// Line items, opaque to the orchestrator.
    pub items: Value,
    /// Total order amount in integer cents.
    pub amount_cents: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Overall phase of a [`SagaExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaPhase {
    /// Steps are being executed in order.
    Running,
    /// A step failed; completed steps are being rolled back in reverse order.
    Compensating,
    /// All steps completed successfully.
    Completed,
    /// Terminal failure (with or without compensation).
    Failed,
}

/// One execution of a saga against an [`Order`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaExecution {
    /// Execution identifier.
    pub id: Uuid,
    /// The order this execution belongs to.
    pub order_id: Uuid,
    /// 1-based index of the step currently executing or most recently attempted.
    pub current_step: i32,
    /// Current phase.
    pub phase: SagaPhase,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the execution reached a terminal phase, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// When compensation began, if it ever did.
    pub compensation_started_at: Option<DateTime<Utc>>,
}

/// State of an individual step within a [`SagaExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    /// Row inserted, not yet started.
    Pending,
    /// Step is executing.
    InProgress,
    /// Step completed successfully.
    Completed,
    /// Step failed.
    Failed,
    /// Step was skipped (its `skipPredicate` matched).
    Skipped,
    /// Step's effects were rolled back by compensation.
    Compensated,
}

/// Persisted record of one saga step's state and payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStepResult {
    /// Row identifier.
    pub id: Uuid,
    /// Owning saga execution.
    pub saga_execution_id: Uuid,
    /// Step name, stable across executions and retries.
    pub step_name: String,
    /// 0-based position in the step list.
    pub step_order: i32,
    /// Current state.
    pub state: StepState,
    /// Serialized success payload, if any.
    pub payload: Option<Value>,
    /// Error message, if the step failed.
    pub error_message: Option<String>,
    /// When the step began executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
}

impl SagaStepResult {
    /// `true` if this step's recorded result is still semantically valid
    /// for a retry to skip re-executing it: completed, and (by convention)
    /// its external effects are assumed to still exist. Callers supply the
    /// existence check; this only enforces the state precondition from
    /// spec §4.8.
    #[must_use]
    pub fn is_skippable_on_retry(&self) -> bool {
        self.state == StepState::Completed
    }
}

/// Kind of an append-only [`HistoryEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEventKind {
    /// A step began executing.
    StepStarted,
    /// A step completed successfully.
    StepCompleted,
    /// A step failed.
    StepFailed,
    /// Compensation began.
    CompensationStarted,
    /// A single step's compensation completed.
    StepCompensated,
    /// A single step's compensation failed.
    CompensationFailed,
    /// The saga reached a terminal failure.
    SagaFailed,
    /// The saga completed successfully.
    SagaCompleted,
}

/// An immutable history event. History events are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Row identifier.
    pub id: Uuid,
    /// The order this event concerns.
    pub order_id: Uuid,
    /// The saga execution this event concerns.
    pub saga_execution_id: Uuid,
    /// Event kind.
    pub kind: HistoryEventKind,
    /// Step name, when the event concerns a specific step.
    pub step_name: Option<String>,
    /// Serialized payload, when applicable.
    pub payload: Option<Value>,
    /// Error message, when applicable.
    pub error: Option<String>,
    /// When the event occurred.
    pub at: DateTime<Utc>,
}

/// A record of a previously handled command, keyed by its idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Caller-supplied idempotency key, unique.
    pub key: String,
    /// Name of the command type this key was used for.
    pub command_type: String,
    /// Aggregate the command targeted.
    pub aggregate_id: Uuid,
    /// Serialized result of the original handling.
    pub result: Value,
    /// When this record was created.
    pub created_at: DateTime<Utc>,
}
