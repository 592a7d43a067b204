//! Shared data model for the Meridian CDC materializer and saga/CQRS core.
//!
//! This crate holds plain data types only: no I/O, no persistence, no
//! business logic beyond constructors and the small invariant predicates
//! that are cheaper to keep next to their type than to duplicate at every
//! call site.

pub mod cdc;
pub mod product;
pub mod saga;

pub use cdc::{CdcEnvelope, CdcMetadata, MaterializedDocument, Operation, StalenessPolicy};
pub use product::{Product, ProductStatus};
pub use saga::{
    HistoryEvent, HistoryEventKind, IdempotencyRecord, Order, OrderStatus, SagaExecution,
    SagaPhase, SagaStepResult, StepState,
};
