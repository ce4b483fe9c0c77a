//! Chain access for payment reconciliation.
//!
//! This crate provides:
//! - The `PaymentReceived` ABI binding and log decoding
//! - `ChainClient`: receipts, historical log queries, live subscriptions
//! - `EthChainClient`, backed by ethers JSON-RPC providers
//! - `MockChainClient`, a scriptable in-memory chain
//! - A reconnecting subscription task

pub mod client;
pub mod error;
pub mod eth;
pub mod event;
pub mod mock;
pub mod subscription;

pub use client::{ChainClient, PaymentFilter, Receipt};
pub use error::{ChainError, Result};
pub use eth::{EthChainClient, EthClientConfig};
pub use event::{PaymentReceivedLog, decode_payment_log};
pub use mock::MockChainClient;
pub use subscription::spawn_subscription;
