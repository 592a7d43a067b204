//! The retry orchestrator (spec §4.8): re-runs a failed, retryable saga
//! from its last good step.
//!
//! Built on [`step_executor::execute_steps`] with a `skip_predicate`
//! derived from [`SagaStepResult::is_skippable_on_retry`] plus a
//! caller-supplied check that the step's external effect still exists —
//! the same two-part gate angzarr's compensation service uses before
//! deciding whether a business response still applies.

use chrono::Utc;
use meridian_persistence::{HistoryRepository, OrderRepository, PersistenceError, SagaRepository, StepResultRepository};
use meridian_types::{HistoryEvent, HistoryEventKind, Order, OrderStatus, SagaExecution, SagaPhase, SagaStepResult};

use crate::compensation::{compensate, mark_saga_failed};
use crate::step_executor::{execute_steps, SagaStep, StepOutcome};

/// Why a retry attempt was refused outright.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// The saga isn't in a state that can be retried — only `Failed`
    /// sagas are eligible (spec §4.8).
    #[error("saga {0} is not in a failed state")]
    NotFailed(uuid::Uuid),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Re-run `steps` against a saga execution that previously failed.
/// Steps whose last recorded result is `Completed` and whose
/// `resource_still_exists` check passes are skipped; every other step
/// (including ones that never ran) executes fresh. On success the saga
/// and order are marked `Completed`; on a further failure, completed
/// steps (prior-skipped plus newly-executed) are compensated and the
/// saga is marked `Failed` again — running this function N times from a
/// terminal `Failed` state yields the same terminal state each time.
pub async fn retry_saga<C, S>(
    steps: &[S],
    context: &C,
    execution: &mut SagaExecution,
    order: &mut Order,
    resource_still_exists: impl Fn(&SagaStepResult) -> bool,
    step_repo: &(dyn StepResultRepository + Send + Sync),
    history_repo: &(dyn HistoryRepository + Send + Sync),
    order_repo: &(dyn OrderRepository + Send + Sync),
    saga_repo: &(dyn SagaRepository + Send + Sync),
) -> Result<StepOutcome, RetryError>
where
    S: SagaStep<C>,
{
    if execution.phase != SagaPhase::Failed {
        return Err(RetryError::NotFailed(execution.id));
    }

    let prior_results = step_repo.list_for_execution(execution.id).await?;

    let skip_predicate = |step: &S| {
        prior_results
            .iter()
            .find(|r| r.step_name == step.name())
            .is_some_and(|r| r.is_skippable_on_retry() && resource_still_exists(r))
    };

    execution.phase = SagaPhase::Running;
    execution.completed_at = None;
    execution.compensation_started_at = None;
    saga_repo.save(execution).await?;

    order.status = OrderStatus::Running;
    order.updated_at = Utc::now();
    order_repo.save(order).await?;

    let outcome = execute_steps(steps, context, execution, skip_predicate, step_repo, history_repo).await?;

    match &outcome {
        StepOutcome::AllSucceeded => {
            execution.phase = SagaPhase::Completed;
            execution.completed_at = Some(Utc::now());
            saga_repo.save(execution).await?;

            order.status = OrderStatus::Completed;
            order.updated_at = Utc::now();
            order_repo.save(order).await?;

            history_repo
                .append(&HistoryEvent {
                    id: uuid::Uuid::new_v4(),
                    order_id: execution.order_id,
                    saga_execution_id: execution.id,
                    kind: HistoryEventKind::SagaCompleted,
                    step_name: None,
                    payload: None,
                    error: None,
                    at: Utc::now(),
                })
                .await?;
        },
        StepOutcome::Failed { completed, .. } => {
            compensate(steps, completed, context, execution, order, step_repo, history_repo, order_repo, saga_repo)
                .await?;
            mark_saga_failed(execution, order, history_repo, order_repo, saga_repo).await?;
        },
    }

    Ok(outcome)
}
