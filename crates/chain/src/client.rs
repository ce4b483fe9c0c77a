use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ChainAddress, TransactionId, TxHash};
use domain::PaymentEvent;
use tokio::sync::mpsc;

use crate::Result;

/// The parts of a transaction receipt the reconciler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    /// False when the transaction reverted.
    pub success: bool,
}

/// Predicates on `PaymentReceived` arguments and a block range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentFilter {
    pub transaction_id: Option<TransactionId>,
    pub sender: Option<ChainAddress>,
    pub from_block: u64,
    /// Inclusive; `None` means up to the latest block.
    pub to_block: Option<u64>,
}

impl PaymentFilter {
    /// Matches events for `id` sent by `sender`.
    pub fn for_payment(id: TransactionId, sender: ChainAddress) -> Self {
        Self {
            transaction_id: Some(id),
            sender: Some(sender),
            ..Default::default()
        }
    }

    /// Restricts the search to a single block.
    pub fn in_block(mut self, block: u64) -> Self {
        self.from_block = block;
        self.to_block = Some(block);
        self
    }

    pub fn from_block(mut self, block: u64) -> Self {
        self.from_block = block;
        self
    }

    pub fn to_block(mut self, block: u64) -> Self {
        self.to_block = Some(block);
        self
    }

    /// Number of blocks covered, or `None` when open-ended.
    pub fn block_span(&self) -> Option<u64> {
        self.to_block
            .map(|to| to.saturating_sub(self.from_block).saturating_add(1))
    }

    /// Returns true if `event` satisfies every predicate.
    pub fn matches(&self, event: &PaymentEvent) -> bool {
        if let Some(id) = self.transaction_id
            && event.transaction_id != id
        {
            return false;
        }
        if let Some(ref sender) = self.sender
            && &event.sender != sender
        {
            return false;
        }
        if event.block_number < self.from_block {
            return false;
        }
        if let Some(to) = self.to_block
            && event.block_number > to
        {
            return false;
        }
        true
    }
}

/// Read access to the payment contract's chain.
///
/// Implementations retry transient provider failures internally, so an error
/// returned here means the retry budget was spent or the failure is permanent.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Returns the receipt of a mined transaction, or `None` if unknown.
    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>>;

    /// Returns decoded payment events matching `filter`, ordered by block
    /// number then log index. Logs that fail to decode are skipped.
    async fn get_payment_events(&self, filter: &PaymentFilter) -> Result<Vec<PaymentEvent>>;

    async fn latest_block(&self) -> Result<u64>;

    /// Returns the timestamp of `block`, or `None` if the block is unknown.
    async fn block_timestamp(&self, block: u64) -> Result<Option<DateTime<Utc>>>;

    /// Subscribes to new payment logs and forwards each decoded event to
    /// `sink`.
    ///
    /// Returns `Ok(())` when an established subscription ends, an error when
    /// connecting fails, and `SinkClosed` when the receiver is gone.
    async fn stream_payments(&self, sink: mpsc::Sender<PaymentEvent>) -> Result<()>;
}
