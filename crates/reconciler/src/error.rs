//! Reconciliation error types.

use chain::ChainError;
use common::{CartId, HexIdError, TransactionId, TxHash};
use domain::{DomainError, TransactionStatus};
use payment_store::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that abort a reconciliation step.
///
/// Business outcomes (integrity failures, late payments, duplicates) are not
/// errors; they are reported as a [`Correlation`](crate::Correlation).
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Chain access error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl ReconcileError {
    /// Returns true if the failure is infrastructure trouble worth retrying
    /// on the next pass.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_transient(),
            ReconcileError::Chain(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Convenience type alias for reconciliation results.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Validation errors returned to callers of [`PaymentIntake`](crate::PaymentIntake).
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(HexIdError),

    #[error("Invalid transaction hash: {0}")]
    InvalidHash(HexIdError),

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Token {0} is not accepted")]
    UnsupportedToken(String),

    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    /// The caller's wallet is not the one that created the transaction.
    #[error("Wallet does not own transaction {0}")]
    AddressMismatch(TransactionId),

    #[error("Transaction {id} is {status}, expected pending")]
    NotPending {
        id: TransactionId,
        status: TransactionStatus,
    },

    /// The hash belongs to another transaction, or this transaction already
    /// carries a different one.
    #[error("Hash {hash} conflicts with transaction {id}")]
    HashConflict { id: TransactionId, hash: TxHash },

    /// The wallet's cart is already awaiting payment by another intent.
    #[error("Cart {cart} is awaiting payment by pending transaction {pending}")]
    CartInUse { cart: CartId, pending: TransactionId },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
