//! Durable store for payment intents and the records settlement produces.
//!
//! [`PaymentStore`] is implemented by [`PostgresPaymentStore`] for production
//! and by [`InMemoryPaymentStore`] for tests and local runs.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryPaymentStore;
pub use postgres::PostgresPaymentStore;
pub use query::TransactionQuery;
pub use store::{FailOutcome, PaymentStore, PaymentStoreExt, SettlementOutcome};
