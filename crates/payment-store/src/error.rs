use common::{CartId, HexIdError, ProductId, TransactionId, TxHash, UserId};
use domain::{DomainError, TransactionStatus};
use thiserror::Error;

/// Errors that can occur when interacting with the payment store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The hash already belongs to another transaction.
    #[error("Transaction hash {hash} is already recorded")]
    DuplicateHash {
        hash: TxHash,
        owner: Option<TransactionId>,
    },

    /// A different hash was already attached to this transaction.
    #[error("Transaction {id} already has hash {existing}")]
    HashAlreadySet { id: TransactionId, existing: TxHash },

    /// The user's active cart is already being paid by a pending transaction.
    #[error("Cart {cart} is awaiting payment by pending transaction {transaction}")]
    CartInUse {
        cart: CartId,
        transaction: TransactionId,
    },

    /// Only pending transactions accept this operation.
    #[error("Transaction {id} is {status}, expected pending")]
    NotPending {
        id: TransactionId,
        status: TransactionStatus,
    },

    /// A value read from or written to storage does not fit its column type.
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// The store cannot serve requests right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid stored identifier: {0}")]
    InvalidIdentifier(#[from] HexIdError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for failures worth retrying: I/O, pool exhaustion,
    /// serialization conflicts and deadlocks.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db_err) => {
                    matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Result type for payment store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_failures() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::TransactionNotFound(TransactionId::new(1)).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn duplicate_hash_message_names_hash() {
        let hash = TxHash::parse(&format!("0x{}", "f".repeat(64))).unwrap();
        let err = StoreError::DuplicateHash {
            hash: hash.clone(),
            owner: Some(TransactionId::new(7)),
        };
        assert!(err.to_string().contains(hash.as_str()));
    }
}
