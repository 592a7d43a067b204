//! PostgreSQL implementations of the repository ports.

pub mod documents;
pub mod idempotency;
pub mod products;
pub mod saga;
pub mod transaction;

pub use documents::{PostgresDeadLetterSink, PostgresDocumentStore};
pub use idempotency::PostgresIdempotencyStore;
pub use products::PostgresProductRepository;
pub use saga::{
    PostgresHistoryRepository, PostgresOrderRepository, PostgresSagaRepository,
    PostgresStepResultRepository,
};
pub use transaction::{persist_product_atomically, PostgresAggregatePersister};
