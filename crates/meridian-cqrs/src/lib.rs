//! The CQRS write side (spec §4.3-§4.8): the Product aggregate, its
//! command handler pipeline, and saga step execution, compensation, and
//! retry orchestration.

pub mod aggregate;
pub mod command_handler;
pub mod compensation;
pub mod order_saga;
pub mod retry_orchestrator;
pub mod step_executor;

pub use command_handler::{CommandEnvelope, CommandHandler, CommandOutcome, ProductCommand};
pub use compensation::{compensate, mark_saga_failed, CompensationSummary, StepCompensationOutcome};
pub use order_saga::{order_saga_steps, AuthorizePaymentStep, OrderSagaContext, ReserveInventoryStep, ShipOrderStep};
pub use retry_orchestrator::{retry_saga, RetryError};
pub use step_executor::{execute_steps, SagaStep, StepExecutionError, StepOutcome};
