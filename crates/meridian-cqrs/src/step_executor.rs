//! The step executor (spec §4.6): runs an ordered list of saga steps,
//! persisting per-step state and appending history as it goes.
//!
//! `SagaStep` is grounded on `benjaminabbitt-angzarr::interfaces::saga::Saga`
//! (`name`/`handle`), reshaped to `name`/`execute`/`compensate` so a step
//! can also describe its own rollback (spec §4.7 needs that symmetrically).

use async_trait::async_trait;
use chrono::Utc;
use meridian_persistence::{HistoryRepository, PersistenceError, StepResultRepository};
use meridian_types::{HistoryEvent, HistoryEventKind, SagaExecution, SagaStepResult, StepState};
use serde_json::Value;
use uuid::Uuid;

/// An error raised by a step's `execute` or `compensate`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StepExecutionError {
    /// Human-readable failure description, persisted verbatim into
    /// `saga_step_results.error_message`.
    pub message: String,
    /// `true` if a retry orchestrator pass may legitimately re-attempt
    /// this step (spec §4.9's enumerated transient kinds).
    pub retryable: bool,
}

impl StepExecutionError {
    /// Build a non-retryable failure.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }

    /// Build a retryable (transient) failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }
}

/// One step in a saga, able to both execute and compensate itself
/// against the same context type `C` (spec §4.6, §4.7).
#[async_trait]
pub trait SagaStep<C>: Send + Sync {
    /// Stable step name, persisted in `saga_step_results.step_name` and
    /// used by the retry orchestrator's `skipPredicate`.
    fn name(&self) -> &str;

    /// Perform the step's effect, returning a serialized success payload.
    async fn execute(&self, context: &C) -> Result<Value, StepExecutionError>;

    /// Roll back this step's effect. Only called for steps that
    /// previously completed (spec §4.7: "Compensation of a never-executed
    /// step is a no-op").
    async fn compensate(&self, context: &C) -> Result<Value, StepExecutionError>;
}

#[async_trait]
impl<C: Send + Sync> SagaStep<C> for Box<dyn SagaStep<C> + Send + Sync> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    async fn execute(&self, context: &C) -> Result<Value, StepExecutionError> {
        self.as_ref().execute(context).await
    }

    async fn compensate(&self, context: &C) -> Result<Value, StepExecutionError> {
        self.as_ref().compensate(context).await
    }
}

/// Outcome of running the full step list (spec §4.6 contract).
#[derive(Debug)]
pub enum StepOutcome {
    /// Every step either completed or was skipped.
    AllSucceeded,
    /// A step failed; `completed` lists the steps (in execution order)
    /// that completed before it, for the compensation orchestrator.
    Failed {
        step: String,
        index: usize,
        error: StepExecutionError,
        completed: Vec<usize>,
    },
}

/// Run `steps` in order against `execution`/`context`, persisting a
/// `saga_step_results` row and a `saga_history` event for each
/// transition (spec §4.6). `skip_predicate` implements the retry
/// orchestrator's resumption logic (spec §4.8); a fresh saga run passes
/// `|_| false`.
pub async fn execute_steps<C, S>(
    steps: &[S],
    context: &C,
    execution: &mut SagaExecution,
    skip_predicate: impl Fn(&S) -> bool,
    step_repo: &(dyn StepResultRepository + Send + Sync),
    history_repo: &(dyn HistoryRepository + Send + Sync),
) -> Result<StepOutcome, PersistenceError>
where
    S: SagaStep<C>,
{
    let mut completed = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        if skip_predicate(step) {
            let result = SagaStepResult {
                id: Uuid::new_v4(),
                saga_execution_id: execution.id,
                step_name: step.name().to_string(),
                step_order: index as i32,
                state: StepState::Skipped,
                payload: None,
                error_message: None,
                started_at: None,
                ended_at: Some(Utc::now()),
            };
            step_repo.insert(&result).await?;
            completed.push(index);
            continue;
        }

        let mut result = SagaStepResult {
            id: Uuid::new_v4(),
            saga_execution_id: execution.id,
            step_name: step.name().to_string(),
            step_order: index as i32,
            state: StepState::Pending,
            payload: None,
            error_message: None,
            started_at: None,
            ended_at: None,
        };
        step_repo.insert(&result).await?;

        result.state = StepState::InProgress;
        result.started_at = Some(Utc::now());
        step_repo.save(&result).await?;

        execution.current_step = index as i32 + 1;

        history_repo
            .append(&HistoryEvent {
                id: Uuid::new_v4(),
                order_id: execution.order_id,
                saga_execution_id: execution.id,
                kind: HistoryEventKind::StepStarted,
                step_name: Some(step.name().to_string()),
                payload: None,
                error: None,
                at: Utc::now(),
            })
            .await?;

        match step.execute(context).await {
            Ok(payload) => {
                result.state = StepState::Completed;
                result.payload = Some(payload.clone());
                result.ended_at = Some(Utc::now());
                step_repo.save(&result).await?;

                history_repo
                    .append(&HistoryEvent {
                        id: Uuid::new_v4(),
                        order_id: execution.order_id,
                        saga_execution_id: execution.id,
                        kind: HistoryEventKind::StepCompleted,
                        step_name: Some(step.name().to_string()),
                        payload: Some(payload),
                        error: None,
                        at: Utc::now(),
                    })
                    .await?;

                completed.push(index);
            },
            Err(error) => {
                result.state = StepState::Failed;
                result.error_message = Some(error.message.clone());
                result.ended_at = Some(Utc::now());
                step_repo.save(&result).await?;

                history_repo
                    .append(&HistoryEvent {
                        id: Uuid::new_v4(),
                        order_id: execution.order_id,
                        saga_execution_id: execution.id,
                        kind: HistoryEventKind::StepFailed,
                        step_name: Some(step.name().to_string()),
                        payload: None,
                        error: Some(error.message.clone()),
                        at: Utc::now(),
                    })
                    .await?;

                return Ok(StepOutcome::Failed {
                    step: step.name().to_string(),
                    index,
                    error,
                    completed,
                });
            },
        }
    }

    Ok(StepOutcome::AllSucceeded)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use meridian_types::SagaPhase;

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

    struct OkStep(&'static str);
    struct FailStep(&'static str);

    #[async_trait]
    impl SagaStep<HashMap<String, i64>> for OkStep {
        fn name(&self) -> &str {
            self.0
        }
        async fn execute(&self, _ctx: &HashMap<String, i64>) -> Result<Value, StepExecutionError> {
            Ok(serde_json::json!({ "ok": true }))
        }
        async fn compensate(&self, _ctx: &HashMap<String, i64>) -> Result<Value, StepExecutionError> {
            Ok(Value::Null)
        }
    }

    #[async_trait]
    impl SagaStep<HashMap<String, i64>> for FailStep {
        fn name(&self) -> &str {
            self.0
        }
        async fn execute(&self, _ctx: &HashMap<String, i64>) -> Result<Value, StepExecutionError> {
            Err(StepExecutionError::fatal("boom"))
        }
        async fn compensate(&self, _ctx: &HashMap<String, i64>) -> Result<Value, StepExecutionError> {
            Ok(Value::Null)
        }
    }

    fn execution() -> SagaExecution {
        SagaExecution {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            current_step: 0,
            phase: SagaPhase::Running,
            started_at: Utc::now(),
            completed_at: None,
            compensation_started_at: None,
        }
    }

    #[tokio::test]
    async fn all_steps_completing_returns_all_succeeded() {
        let steps = vec![OkStep("reserve"), OkStep("charge")];
        let ctx = HashMap::new();
        let mut exec = execution();
        let step_repo = FakeStepRepo::default();
        let history_repo = FakeHistoryRepo::default();

        let outcome = execute_steps(&steps, &ctx, &mut exec, |_| false, &step_repo, &history_repo)
            .await
            .unwrap();

        assert!(matches!(outcome, StepOutcome::AllSucceeded));
        assert_eq!(exec.current_step, 2);
        assert_eq!(step_repo.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn a_failing_step_stops_and_reports_completed_predecessors() {
        // Boxed trait objects let a single step list mix concrete types.
        let steps: Vec<Box<dyn SagaStep<HashMap<String, i64>> + Send + Sync>> =
            vec![Box::new(OkStep("reserve")), Box::new(FailStep("authorize"))];
        let ctx = HashMap::new();
        let mut exec = execution();
        let step_repo = FakeStepRepo::default();
        let history_repo = FakeHistoryRepo::default();

        let outcome = execute_steps(&steps, &ctx, &mut exec, |_| false, &step_repo, &history_repo)
            .await
            .unwrap();

        match outcome {
            StepOutcome::Failed { step, index, completed, .. } => {
                assert_eq!(step, "authorize");
                assert_eq!(index, 1);
                assert_eq!(completed, vec![0]);
            },
            StepOutcome::AllSucceeded => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn skip_predicate_marks_steps_skipped_without_executing() {
        let steps = vec![OkStep("reserve"), OkStep("charge")];
        let ctx = HashMap::new();
        let mut exec = execution();
        let step_repo = FakeStepRepo::default();
        let history_repo = FakeHistoryRepo::default();

        let outcome = execute_steps(&steps, &ctx, &mut exec, |s| s.name() == "reserve", &step_repo, &history_repo)
            .await
            .unwrap();

        assert!(matches!(outcome, StepOutcome::AllSucceeded));
        let rows = step_repo.rows.lock().unwrap();
        let reserve = rows.iter().find(|r| r.step_name == "reserve").unwrap();
        assert_eq!(reserve.state, StepState::Skipped);
    }
}
