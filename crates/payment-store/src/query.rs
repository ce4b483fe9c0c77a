use chrono::{DateTime, Utc};
use common::{ChainAddress, TxHash};
use domain::TransactionStatus;

/// Builder for filtering transactions.
///
/// Results are ordered by creation time, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionQuery {
    pub wallet_address: Option<ChainAddress>,
    pub status: Option<TransactionStatus>,
    pub tx_hash: Option<TxHash>,

    /// Created at or after this timestamp.
    pub created_after: Option<DateTime<Utc>>,

    /// Created strictly before this timestamp.
    pub created_before: Option<DateTime<Utc>>,

    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl TransactionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending transactions created before `cutoff`.
    pub fn pending_before(cutoff: DateTime<Utc>) -> Self {
        Self {
            status: Some(TransactionStatus::Pending),
            created_before: Some(cutoff),
            ..Default::default()
        }
    }

    pub fn for_wallet(wallet: ChainAddress) -> Self {
        Self {
            wallet_address: Some(wallet),
            ..Default::default()
        }
    }

    pub fn wallet(mut self, wallet: ChainAddress) -> Self {
        self.wallet_address = Some(wallet);
        self
    }

    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn tx_hash(mut self, hash: TxHash) -> Self {
        self.tx_hash = Some(hash);
        self
    }

    pub fn created_after(mut self, timestamp: DateTime<Utc>) -> Self {
        self.created_after = Some(timestamp);
        self
    }

    pub fn created_before(mut self, timestamp: DateTime<Utc>) -> Self {
        self.created_before = Some(timestamp);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_before_sets_status_and_cutoff() {
        let cutoff = Utc::now();
        let query = TransactionQuery::pending_before(cutoff);

        assert_eq!(query.status, Some(TransactionStatus::Pending));
        assert_eq!(query.created_before, Some(cutoff));
        assert!(query.wallet_address.is_none());
    }

    #[test]
    fn query_builder_chain() {
        let wallet = ChainAddress::zero();
        let query = TransactionQuery::new()
            .wallet(wallet.clone())
            .status(TransactionStatus::Confirmed)
            .limit(10)
            .offset(5);

        assert_eq!(query.wallet_address, Some(wallet));
        assert_eq!(query.status, Some(TransactionStatus::Confirmed));
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(5));
    }
}
