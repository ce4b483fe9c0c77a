use common::HexIdError;
use domain::DomainError;
use ethers::providers::ProviderError;
use thiserror::Error;

/// Errors that can occur when talking to the chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The JSON-RPC provider failed (network, timeout, rate limit).
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A connection could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// A log did not decode as `PaymentReceived`.
    #[error("Failed to decode log: {0}")]
    Decode(String),

    #[error("Log is missing {0}")]
    MissingField(&'static str),

    /// The log was removed by a chain reorganization.
    #[error("Log was removed by a reorg")]
    RemovedLog,

    /// The provider refused a log query spanning too many blocks.
    #[error("Block range from {from} to {to:?} exceeds the limit of {limit} blocks")]
    RangeTooLarge {
        from: u64,
        to: Option<u64>,
        limit: u64,
    },

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] HexIdError),

    /// The consumer of a live subscription went away.
    #[error("Event sink closed")]
    SinkClosed,
}

impl ChainError {
    /// Returns true for failures that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Provider(_) | ChainError::Connection(_))
    }
}

/// Result type for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;
