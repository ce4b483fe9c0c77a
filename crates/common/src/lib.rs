//! Shared building blocks for the payment reconciler crates.

pub mod address;
pub mod retry;
pub mod types;

pub use address::{ChainAddress, HexIdError, TxHash};
pub use retry::RetryPolicy;
pub use types::{CartId, OrderItemId, ProductId, TransactionId, UserId};
