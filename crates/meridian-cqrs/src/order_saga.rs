//! A concrete three-step order saga — reserve inventory, authorize
//! payment, ship — the exact step sequence spec §8 scenario F names.
//!
//! Distinct step types can't share one `Vec<S: SagaStep<C>>` (a single
//! type parameter is monomorphic), so callers that need a heterogeneous
//! step list box each step as `dyn SagaStep<C> + Send + Sync`, which the
//! blanket impl in `step_executor` makes usable anywhere a bare `S:
//! SagaStep<C>` is expected.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::step_executor::{SagaStep, StepExecutionError};

/// Shared state the three order-saga steps act on. Stands in for the
/// inventory/payment/shipping services a real deployment would call out
/// to; `ship_should_fail` lets tests drive the scenario-F failure path
/// and then flip it off before retrying.
#[derive(Debug, Default)]
pub struct OrderSagaContext {
    pub reserved: Mutex<bool>,
    pub authorized: Mutex<bool>,
    pub shipped: Mutex<bool>,
    pub ship_should_fail: Mutex<bool>,
}

impl OrderSagaContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_at_ship() -> Self {
        let ctx = Self::default();
        *ctx.ship_should_fail.lock().unwrap() = true;
        ctx
    }
}

/// Step 1: reserve the order's line items against available stock.
pub struct ReserveInventoryStep;

#[async_trait]
impl SagaStep<OrderSagaContext> for ReserveInventoryStep {
    fn name(&self) -> &str {
        "reserve"
    }

    async fn execute(&self, ctx: &OrderSagaContext) -> Result<Value, StepExecutionError> {
        *ctx.reserved.lock().unwrap() = true;
        Ok(json!({ "reserved": true }))
    }

    async fn compensate(&self, ctx: &OrderSagaContext) -> Result<Value, StepExecutionError> {
        *ctx.reserved.lock().unwrap() = false;
        Ok(json!({ "released": true }))
    }
}

/// Step 2: authorize payment for the order total.
pub struct AuthorizePaymentStep;

#[async_trait]
impl SagaStep<OrderSagaContext> for AuthorizePaymentStep {
    fn name(&self) -> &str {
        "authorize"
    }

    async fn execute(&self, ctx: &OrderSagaContext) -> Result<Value, StepExecutionError> {
        *ctx.authorized.lock().unwrap() = true;
        Ok(json!({ "authorized": true }))
    }

    async fn compensate(&self, ctx: &OrderSagaContext) -> Result<Value, StepExecutionError> {
        *ctx.authorized.lock().unwrap() = false;
        Ok(json!({ "voided": true }))
    }
}

/// Step 3: hand the order to the carrier.
pub struct ShipOrderStep;

#[async_trait]
impl SagaStep<OrderSagaContext> for ShipOrderStep {
    fn name(&self) -> &str {
        "ship"
    }

    async fn execute(&self, ctx: &OrderSagaContext) -> Result<Value, StepExecutionError> {
        if *ctx.ship_should_fail.lock().unwrap() {
            return Err(StepExecutionError::transient("carrier rejected shipment"));
        }
        *ctx.shipped.lock().unwrap() = true;
        Ok(json!({ "shipped": true }))
    }

    async fn compensate(&self, ctx: &OrderSagaContext) -> Result<Value, StepExecutionError> {
        *ctx.shipped.lock().unwrap() = false;
        Ok(json!({ "recalled": true }))
    }
}

/// The canonical [reserve, authorize, ship] step list, boxed so the
/// three distinct step types can share one `Vec`.
#[must_use]
pub fn order_saga_steps() -> Vec<Box<dyn SagaStep<OrderSagaContext> + Send + Sync>> {
    vec![Box::new(ReserveInventoryStep), Box::new(AuthorizePaymentStep), Box::new(ShipOrderStep)]
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use meridian_types::{HistoryEvent, Order, OrderStatus, PersistenceError, SagaExecution, SagaPhase, SagaStepResult};
    use meridian_persistence::{HistoryRepository, OrderRepository, SagaRepository, StepResultRepository};
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    use super::*;
    use crate::compensation::compensate;
    use crate::retry_orchestrator::retry_saga;
    use crate::step_executor::{execute_steps, StepOutcome};

    #[derive(Default)]
    struct FakeStepRepo {
        rows: StdMutex<Vec<SagaStepResult>>,
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
        events: StdMutex<Vec<HistoryEvent>>,
    }

    #[async_trait]
    impl HistoryRepository for FakeHistoryRepo {
        async fn append(&self, event: &HistoryEvent) -> Result<(), PersistenceError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
        async fn list_for_order(&self, order_id: Uuid) -> Result<Vec<HistoryEvent>, PersistenceError> {
            Ok(self.events.lock().unwrap().iter().filter(|e| e.order_id == order_id).cloned().collect())
        }
    }

    #[derive(Default)]
    struct FakeOrderRepo {
        saved: StdMutex<Vec<Order>>,
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
        saved: StdMutex<Vec<SagaExecution>>,
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

    fn order(id: Uuid) -> Order {
        Order {
            id,
            status: OrderStatus::Running,
            items: Value::Null,
            amount_cents: 5_000,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn execution(order_id: Uuid) -> SagaExecution {
        SagaExecution {
            id: Uuid::new_v4(),
            order_id,
            current_step: 0,
            phase: SagaPhase::Running,
            started_at: Utc::now(),
            completed_at: None,
            compensation_started_at: None,
        }
    }

    /// Spec §8 scenario F end to end: [reserve, authorize, ship] fails at
    /// `ship`; compensation order is [ship(not-required), authorize,
    /// reserve]; all prior completed steps reach `Compensated`;
    /// `all_successful=true`. Then the saga is retried with the carrier
    /// fixed and converges on `Completed`.
    #[tokio::test]
    async fn scenario_f_compensates_then_retries_to_completion() {
        let steps = order_saga_steps();
        let ctx = OrderSagaContext::failing_at_ship();
        let order_id = Uuid::new_v4();
        let mut exec = execution(order_id);
        let mut ord = order(order_id);

        let step_repo = FakeStepRepo::default();
        let history_repo = FakeHistoryRepo::default();
        let order_repo = FakeOrderRepo::default();
        let saga_repo = FakeSagaRepo::default();

        let outcome = execute_steps(&steps, &ctx, &mut exec, |_| false, &step_repo, &history_repo).await.unwrap();

        let completed = match outcome {
            StepOutcome::Failed { ref step, ref completed, .. } => {
                assert_eq!(step, "ship");
                assert_eq!(completed, &vec![0, 1]);
                completed.clone()
            },
            StepOutcome::AllSucceeded => panic!("ship was expected to fail"),
        };
        assert!(*ctx.reserved.lock().unwrap());
        assert!(*ctx.authorized.lock().unwrap());
        assert!(!*ctx.shipped.lock().unwrap());

        let summary = compensate(&steps, &completed, &ctx, &mut exec, &mut ord, &step_repo, &history_repo, &order_repo, &saga_repo)
            .await
            .unwrap();

        assert!(summary.all_successful);
        assert_eq!(summary.compensated_steps, vec!["authorize", "reserve"]);
        assert!(!*ctx.reserved.lock().unwrap());
        assert!(!*ctx.authorized.lock().unwrap());

        crate::compensation::mark_saga_failed(&mut exec, &mut ord, &history_repo, &order_repo, &saga_repo)
            .await
            .unwrap();
        assert_eq!(exec.phase, SagaPhase::Failed);
        assert_eq!(ord.status, OrderStatus::Failed);

        *ctx.ship_should_fail.lock().unwrap() = false;
        let retry_outcome =
            retry_saga(&steps, &ctx, &mut exec, &mut ord, |_| false, &step_repo, &history_repo, &order_repo, &saga_repo)
                .await
                .unwrap();

        assert!(matches!(retry_outcome, StepOutcome::AllSucceeded));
        assert_eq!(exec.phase, SagaPhase::Completed);
        assert_eq!(ord.status, OrderStatus::Completed);
        assert!(*ctx.shipped.lock().unwrap());
    }
}
