//! Payment transaction status machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The status of a payment transaction.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Confirmed
///           └──► Failed
/// ```
/// Both `Confirmed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Payment intent recorded, not yet verified on chain.
    #[default]
    Pending,

    /// Matching on-chain payment found and settled (terminal state).
    Confirmed,

    /// No valid payment arrived in time (terminal state).
    Failed,
}

impl TransactionStatus {
    pub fn can_confirm(&self) -> bool {
        matches!(self, TransactionStatus::Pending)
    }

    pub fn can_fail(&self) -> bool {
        matches!(self, TransactionStatus::Pending)
    }

    /// Returns true if user-driven updates (e.g. attaching a hash) are allowed.
    pub fn is_mutable(&self) -> bool {
        matches!(self, TransactionStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Confirmed | TransactionStatus::Failed
        )
    }

    /// Validates a transition, returning the target status on success.
    pub fn transition_to(self, target: TransactionStatus) -> Result<TransactionStatus, DomainError> {
        let allowed = match target {
            TransactionStatus::Confirmed => self.can_confirm(),
            TransactionStatus::Failed => self.can_fail(),
            TransactionStatus::Pending => false,
        };
        if allowed {
            Ok(target)
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    /// Returns the lower-case name used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "confirmed" => Ok(TransactionStatus::Confirmed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Fulfilment status of a materialized order line. Only changed by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    #[default]
    Pending,
    Shipped,
    Delivered,
    Cancelled,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => "pending",
            FulfillmentStatus::Shipped => "shipped",
            FulfillmentStatus::Delivered => "delivered",
            FulfillmentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FulfillmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FulfillmentStatus::Pending),
            "shipped" => Ok(FulfillmentStatus::Shipped),
            "delivered" => Ok(FulfillmentStatus::Delivered),
            "cancelled" => Ok(FulfillmentStatus::Cancelled),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}
