//! The compensation orchestrator (spec §4.7): rolls back the steps that
//! completed before a saga failed, in reverse order.
//!
//! Grounded on `benjaminabbitt-angzarr::services::saga_compensation`'s
//! tagged-outcome pattern (`CompensationOutcome::{Events,
//! EmitSystemRevocation, Declined, Aborted}`), reshaped to one outcome
//! per step rather than one outcome for a whole business response.

use async_trait::async_trait;
use chrono::Utc;
use meridian_persistence::{
    HistoryRepository, OrderRepository, PersistenceError, SagaRepository, StepResultRepository,
};
use meridian_types::{HistoryEvent, HistoryEventKind, Order, OrderStatus, SagaExecution, SagaPhase, SagaStepResult, StepState};
use uuid::Uuid;

use crate::step_executor::{SagaStep, StepExecutionError};

/// What happened when compensating one step.
#[derive(Debug)]
pub enum StepCompensationOutcome {
    /// The step's effects were rolled back successfully.
    Compensated,
    /// The step never completed (it was `Pending`, `Skipped`, or never
    /// ran at all) so there's nothing to undo (spec §4.7: "Compensation
    /// of a never-executed step is a no-op").
    NotRequired,
    /// Compensation was attempted and failed.
    Failed(StepExecutionError),
}

/// Result of compensating an entire completed-step list.
#[derive(Debug, Default)]
pub struct CompensationSummary {
    /// Step names that were successfully compensated.
    pub compensated_steps: Vec<String>,
    /// Step names whose compensation failed, with the error.
    pub failed_compensations: Vec<(String, StepExecutionError)>,
    /// `true` if every completed step was compensated without error.
    pub all_successful: bool,
}

/// Roll back `completed` (indices into `steps`, in original execution
/// order) against `context`, recording history and step-result state
/// along the way (spec §4.7). Sets the saga phase to `Compensating` and
/// the order status to `Compensating` for the duration, then leaves the
/// saga in `Failed` phase once compensation concludes — callers that are
/// mid-retry may choose to suppress the final `SagaFailed` event by
/// inspecting the returned summary instead of calling
/// [`mark_saga_failed`].
pub async fn compensate<C, S>(
    steps: &[S],
    completed: &[usize],
    context: &C,
    execution: &mut SagaExecution,
    order: &mut Order,
    step_repo: &(dyn StepResultRepository + Send + Sync),
    history_repo: &(dyn HistoryRepository + Send + Sync),
    order_repo: &(dyn OrderRepository + Send + Sync),
    saga_repo: &(dyn SagaRepository + Send + Sync),
) -> Result<CompensationSummary, PersistenceError>
where
    S: SagaStep<C>,
{
    execution.phase = SagaPhase::Compensating;
    execution.compensation_started_at = Some(Utc::now());
    saga_repo.save(execution).await?;

    order.status = OrderStatus::Compensating;
    order.updated_at = Utc::now();
    order_repo.save(order).await?;

    history_repo
        .append(&HistoryEvent {
            id: Uuid::new_v4(),
            order_id: execution.order_id,
            saga_execution_id: execution.id,
            kind: HistoryEventKind::CompensationStarted,
            step_name: None,
            payload: None,
            error: None,
            at: Utc::now(),
        })
        .await?;

    let results = step_repo.list_for_execution(execution.id).await?;
    let mut summary = CompensationSummary::default();

    for &index in completed.iter().rev() {
        let Some(step) = steps.get(index) else { continue };

        let prior = results.iter().find(|r| r.step_order == index as i32 && r.step_name == step.name());
        let outcome = match prior {
            Some(result) if result.state == StepState::Completed => {
                match step.compensate(context).await {
                    Ok(_) => StepCompensationOutcome::Compensated,
                    Err(error) => StepCompensationOutcome::Failed(error),
                }
            },
            _ => StepCompensationOutcome::NotRequired,
        };

        match outcome {
            StepCompensationOutcome::Compensated => {
                if let Some(result) = prior {
                    let mut updated = result.clone();
                    updated.state = StepState::Compensated;
                    updated.ended_at = Some(Utc::now());
                    step_repo.save(&updated).await?;
                }

                history_repo
                    .append(&HistoryEvent {
                        id: Uuid::new_v4(),
                        order_id: execution.order_id,
                        saga_execution_id: execution.id,
                        kind: HistoryEventKind::StepCompensated,
                        step_name: Some(step.name().to_string()),
                        payload: None,
                        error: None,
                        at: Utc::now(),
                    })
                    .await?;

                summary.compensated_steps.push(step.name().to_string());
            },
            StepCompensationOutcome::NotRequired => {},
            StepCompensationOutcome::Failed(error) => {
                history_repo
                    .append(&HistoryEvent {
                        id: Uuid::new_v4(),
                        order_id: execution.order_id,
                        saga_execution_id: execution.id,
                        kind: HistoryEventKind::CompensationFailed,
                        step_name: Some(step.name().to_string()),
                        payload: None,
                        error: Some(error.message.clone()),
                        at: Utc::now(),
                    })
                    .await?;

                summary.failed_compensations.push((step.name().to_string(), error));
            },
        }
    }

    summary.all_successful = summary.failed_compensations.is_empty();
    Ok(summary)
}

/// Mark the saga and order `Failed` once compensation has run its course
/// (spec §4.7's final `SagaFailed` history event). Split out from
/// [`compensate`] so the retry orchestrator can suppress it when it
/// intends to immediately re-run the saga.
pub async fn mark_saga_failed(
    execution: &mut SagaExecution,
    order: &mut Order,
    history_repo: &(dyn HistoryRepository + Send + Sync),
    order_repo: &(dyn OrderRepository + Send + Sync),
    saga_repo: &(dyn SagaRepository + Send + Sync),
) -> Result<(), PersistenceError> {
    execution.phase = SagaPhase::Failed;
    execution.completed_at = Some(Utc::now());
    saga_repo.save(execution).await?;

    order.status = OrderStatus::Failed;
    order.updated_at = Utc::now();
    order_repo.save(order).await?;

    history_repo
        .append(&HistoryEvent {
            id: Uuid::new_v4(),
            order_id: execution.order_id,
            saga_execution_id: execution.id,
            kind: HistoryEventKind::SagaFailed,
            step_name: None,
            payload: None,
            error: None,
            at: Utc::now(),
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::Value;

    use super::*;

    #[derive(Default)]
    struct FakeStepRepo {
        rows: Mutex<Vec<SagaStepResult>>,
    }

    #[async_trait]
    impl StepResultRepository for FakeStepRepo {
        async fn list_for_execution(&self, saga_execution_id: Uuid) -> Result<Vec<SagaStepResult>, PersistenceError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.saga_execution_id == saga_execution_id)
                .cloned()
                .collect())
        }
        async fn insert(&self, result: &SagaStepResult) -> Result<(), PersistenceError> {
            self.rows.lock().unwrap().push(result.clone());
            Ok(())
        }
        async fn save(&self, result: &SagaStepResult) -> Result<(), PersistenceError> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(existing) = rows.iter_mut().find(|r| r.id == result.id) {
                *existing = result.clone();
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeHistoryRepo {
        events: Mutex<Vec<HistoryEvent>>,
    }

    #[async_trait]
    impl HistoryRepository for FakeHistoryRepo {
        async fn append(&self, event: &HistoryEvent) -> Result<(), PersistenceError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
        async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<HistoryEvent>, PersistenceError> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.order_id == order_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeOrderRepo {
        saved: Mutex<Vec<Order>>,
    }

    #[async_trait]
    impl OrderRepository for FakeOrderRepo {
        async fn find(&self, _id: Uuid) -> Result<Option<Order>, PersistenceError> {
            Ok(self.saved.lock().unwrap().last().cloned())
        }
        async fn save(&self, order: &Order) -> Result<(), PersistenceError> {
            self.saved.lock().unwrap().push(order.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSagaRepo {
        saved: Mutex<Vec<SagaExecution>>,
    }

    #[async_trait]
    impl SagaRepository for FakeSagaRepo {
        async fn find(&self, _id: Uuid) -> Result<Option<SagaExecution>, PersistenceError> {
            Ok(self.saved.lock().unwrap().last().cloned())
        }
        async fn find_latest_for_order(&self, _order_id: Uuid) -> Result<Option<SagaExecution>, PersistenceError> {
            Ok(self.saved.lock().unwrap().last().cloned())
        }
        async fn insert(&self, execution: &SagaExecution) -> Result<(), PersistenceError> {
            self.saved.lock().unwrap().push(execution.clone());
            Ok(())
        }
        async fn save(&self, execution: &SagaExecution) -> Result<(), PersistenceError> {
            self.saved.lock().unwrap().push(execution.clone());
            Ok(())
        }
    }

    struct OkStep(&'static str);
    struct FailingCompensateStep(&'static str);

    #[async_trait]
    impl SagaStep<HashMap<String, i64>> for OkStep {
        fn name(&self) -> &str {
            self.0
        }
        async fn execute(&self, _ctx: &HashMap<String, i64>) -> Result<Value, StepExecutionError> {
            Ok(Value::Null)
        }
        async fn compensate(&self, _ctx: &HashMap<String, i64>) -> Result<Value, StepExecutionError> {
            Ok(Value::Null)
        }
    }

    #[async_trait]
    impl SagaStep<HashMap<String, i64>> for FailingCompensateStep {
        fn name(&self) -> &str {
            self.0
        }
        async fn execute(&self, _ctx: &HashMap<String, i64>) -> Result<Value, StepExecutionError> {
            Ok(Value::Null)
        }
        async fn compensate(&self, _ctx: &HashMap<String, i64>) -> Result<Value, StepExecutionError> {
            Err(StepExecutionError::fatal("refund failed"))
        }
    }

    fn order(id: Uuid) -> Order {
        Order {
            id,
            status: OrderStatus::Running,
            items: Value::Null,
            amount_cents: 100,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn execution(order_id: Uuid) -> SagaExecution {
        SagaExecution {
            id: Uuid::new_v4(),
            order_id,
            current_step: 2,
            phase: SagaPhase::Running,
            started_at: Utc::now(),
            completed_at: None,
            compensation_started_at: None,
        }
    }

    #[tokio::test]
    async fn completed_steps_are_compensated_in_reverse_order() {
        let steps = vec![OkStep("reserve"), OkStep("charge")];
        let ctx = HashMap::new();
        let order_id = Uuid::new_v4();
        let mut exec = execution(order_id);
        let mut ord = order(order_id);

        let step_repo = FakeStepRepo::default();
        step_repo.rows.lock().unwrap().extend([
            SagaStepResult {
                id: Uuid::new_v4(),
                saga_execution_id: exec.id,
                step_name: "reserve".into(),
                step_order: 0,
                state: StepState::Completed,
                payload: None,
                error_message: None,
                started_at: None,
                ended_at: None,
            },
            SagaStepResult {
                id: Uuid::new_v4(),
                saga_execution_id: exec.id,
                step_name: "charge".into(),
                step_order: 1,
                state: StepState::Completed,
                payload: None,
                error_message: None,
                started_at: None,
                ended_at: None,
            },
        ]);
        let history_repo = FakeHistoryRepo::default();
        let order_repo = FakeOrderRepo::default();
        let saga_repo = FakeSagaRepo::default();

        let summary = compensate(
            &steps,
            &[0, 1],
            &ctx,
            &mut exec,
            &mut ord,
            &step_repo,
            &history_repo,
            &order_repo,
            &saga_repo,
        )
        .await
        .unwrap();

        assert!(summary.all_successful);
        assert_eq!(summary.compensated_steps, vec!["charge", "reserve"]);
        assert_eq!(ord.status, OrderStatus::Compensating);
        assert_eq!(exec.phase, SagaPhase::Compensating);
    }

    #[tokio::test]
    async fn a_failing_compensation_is_recorded_but_does_not_stop_the_rollback() {
        let steps: Vec<Box<dyn SagaStep<HashMap<String, i64>> + Send + Sync>> =
            vec![Box::new(OkStep("reserve")), Box::new(FailingCompensateStep("charge"))];
        let ctx = HashMap::new();
        let order_id = Uuid::new_v4();
        let mut exec = execution(order_id);
        let mut ord = order(order_id);

        let step_repo = FakeStepRepo::default();
        step_repo.rows.lock().unwrap().extend([
            SagaStepResult {
                id: Uuid::new_v4(),
                saga_execution_id: exec.id,
                step_name: "reserve".into(),
                step_order: 0,
                state: StepState::Completed,
                payload: None,
                error_message: None,
                started_at: None,
                ended_at: None,
            },
            SagaStepResult {
                id: Uuid::new_v4(),
                saga_execution_id: exec.id,
                step_name: "charge".into(),
                step_order: 1,
                state: StepState::Completed,
                payload: None,
                error_message: None,
                started_at: None,
                ended_at: None,
            },
        ]);
        let history_repo = FakeHistoryRepo::default();
        let order_repo = FakeOrderRepo::default();
        let saga_repo = FakeSagaRepo::default();

        let summary = compensate(
            &steps,
            &[0, 1],
            &ctx,
            &mut exec,
            &mut ord,
            &step_repo,
            &history_repo,
            &order_repo,
            &saga_repo,
        )
        .await
        .unwrap();

        assert!(!summary.all_successful);
        assert_eq!(summary.compensated_steps, vec!["reserve"]);
        assert_eq!(summary.failed_compensations.len(), 1);
        assert_eq!(summary.failed_compensations[0].0, "charge");
    }

    #[tokio::test]
    async fn a_step_that_never_completed_is_not_required_to_compensate() {
        let steps = vec![OkStep("reserve")];
        let ctx = HashMap::new();
        let order_id = Uuid::new_v4();
        let mut exec = execution(order_id);
        let mut ord = order(order_id);

        // No step result rows recorded: the step never ran.
        let step_repo = FakeStepRepo::default();
        let history_repo = FakeHistoryRepo::default();
        let order_repo = FakeOrderRepo::default();
        let saga_repo = FakeSagaRepo::default();

        let summary = compensate(
            &steps,
            &[0],
            &ctx,
            &mut exec,
            &mut ord,
            &step_repo,
            &history_repo,
            &order_repo,
            &saga_repo,
        )
        .await
        .unwrap();

        assert!(summary.all_successful);
        assert!(summary.compensated_steps.is_empty());
    }
}
