//! Domain error types.

use common::HexIdError;
use thiserror::Error;

use crate::status::TransactionStatus;

/// Errors raised by domain rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Status change not permitted by the transaction state machine.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Unknown token: {0}")]
    UnknownToken(String),

    /// A raw on-chain amount does not fit the decimal representation.
    #[error("Amount {raw} with {decimals} decimals is out of range")]
    AmountOutOfRange { raw: u128, decimals: u32 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Transaction id {0} is out of range")]
    TransactionIdOutOfRange(u64),

    #[error("Invalid quantity {quantity} for product {product}")]
    InvalidQuantity { product: String, quantity: i64 },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] HexIdError),
}

pub type Result<T> = std::result::Result<T, DomainError>;
