//! Repository traits and PostgreSQL implementations shared by the CDC
//! materializer and saga/CQRS core (spec §3, §6).

pub mod ports;
pub mod postgres;

pub use ports::{
    AggregatePersister, DeadLetterSink, DocumentStore, HistoryRepository, IdempotencyStore,
    OrderRepository, OutboxEvent, PersistenceError, ProductRepository, SagaRepository,
    StepResultRepository,
};
