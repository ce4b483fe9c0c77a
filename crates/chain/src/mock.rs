//! Scriptable in-memory chain for tests and local runs without a node.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::TxHash;
use domain::PaymentEvent;
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::client::{ChainClient, PaymentFilter, Receipt};
use crate::error::{ChainError, Result};

#[derive(Debug)]
enum LiveItem {
    Event(PaymentEvent),
    Disconnect,
}

#[derive(Debug, Default)]
struct ChainState {
    receipts: HashMap<TxHash, Receipt>,
    /// Every event ever emitted, in emission order.
    events: Vec<PaymentEvent>,
    latest_block: u64,
    /// Genesis time and seconds per block; timestamps are unknown when unset.
    block_times: Option<(DateTime<Utc>, i64)>,
    max_block_range: Option<u64>,
}

/// In-memory [`ChainClient`].
///
/// Historical events are served from an append-only log; live events pushed
/// with [`push_live_event`](Self::push_live_event) are delivered to the
/// current subscriber and also recorded in history, as a real node would.
#[derive(Clone)]
pub struct MockChainClient {
    state: Arc<RwLock<ChainState>>,
    live_tx: mpsc::UnboundedSender<LiveItem>,
    live_rx: Arc<Mutex<mpsc::UnboundedReceiver<LiveItem>>>,
    failing_lookups: Arc<AtomicU32>,
    failing_connects: Arc<AtomicU32>,
    lookups: Arc<AtomicU32>,
    subscriptions: Arc<AtomicU32>,
}

impl MockChainClient {
    pub fn new() -> Self {
        let (live_tx, live_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(RwLock::new(ChainState::default())),
            live_tx,
            live_rx: Arc::new(Mutex::new(live_rx)),
            failing_lookups: Arc::new(AtomicU32::new(0)),
            failing_connects: Arc::new(AtomicU32::new(0)),
            lookups: Arc::new(AtomicU32::new(0)),
            subscriptions: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Records a historical event without delivering it live.
    pub async fn add_event(&self, event: PaymentEvent) {
        let mut state = self.state.write().await;
        state.latest_block = state.latest_block.max(event.block_number);
        state.events.push(event);
    }

    pub async fn add_receipt(&self, receipt: Receipt) {
        let mut state = self.state.write().await;
        state.latest_block = state.latest_block.max(receipt.block_number);
        state.receipts.insert(receipt.tx_hash.clone(), receipt);
    }

    pub async fn set_latest_block(&self, block: u64) {
        self.state.write().await.latest_block = block;
    }

    /// Gives block `n` the timestamp `genesis + n * seconds_per_block`.
    pub async fn set_block_times(&self, genesis: DateTime<Utc>, seconds_per_block: i64) {
        self.state.write().await.block_times = Some((genesis, seconds_per_block));
    }

    /// Rejects log queries spanning more than `blocks` blocks, like hosted
    /// RPC providers do.
    pub async fn limit_block_range(&self, blocks: u64) {
        self.state.write().await.max_block_range = Some(blocks);
    }

    /// Emits an event to the live subscriber and records it in history.
    pub async fn push_live_event(&self, event: PaymentEvent) {
        self.add_event(event.clone()).await;
        // The receiver lives as long as `self`
        let _ = self.live_tx.send(LiveItem::Event(event));
    }

    /// Ends the current subscription as if the websocket dropped.
    pub fn drop_connection(&self) {
        let _ = self.live_tx.send(LiveItem::Disconnect);
    }

    /// Makes the next `n` event lookups fail with a transient error.
    pub fn fail_next_lookups(&self, n: u32) {
        self.failing_lookups.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` subscription attempts fail to connect.
    pub fn fail_next_connects(&self, n: u32) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Number of `get_payment_events` calls served, failed ones included.
    pub fn lookup_count(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Number of `stream_payments` calls, failed ones included.
    pub fn subscription_count(&self) -> u32 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>> {
        Ok(self.state.read().await.receipts.get(hash).cloned())
    }

    async fn get_payment_events(&self, filter: &PaymentFilter) -> Result<Vec<PaymentEvent>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_lookups) {
            return Err(ChainError::Connection("injected lookup failure".to_string()));
        }

        let state = self.state.read().await;
        if let Some(limit) = state.max_block_range
            && filter.block_span().is_none_or(|span| span > limit)
        {
            return Err(ChainError::RangeTooLarge {
                from: filter.from_block,
                to: filter.to_block,
                limit,
            });
        }
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.position());
        Ok(events)
    }

    async fn latest_block(&self) -> Result<u64> {
        Ok(self.state.read().await.latest_block)
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.read().await;
        if block > state.latest_block {
            return Ok(None);
        }
        Ok(state.block_times.and_then(|(genesis, seconds)| {
            let offset = i64::try_from(block).ok()?.checked_mul(seconds)?;
            genesis.checked_add_signed(chrono::Duration::try_seconds(offset)?)
        }))
    }

    async fn stream_payments(&self, sink: mpsc::Sender<PaymentEvent>) -> Result<()> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_connects) {
            return Err(ChainError::Connection("injected connect failure".to_string()));
        }

        let mut feed = self.live_rx.lock().await;
        while let Some(item) = feed.recv().await {
            match item {
                LiveItem::Event(event) => {
                    sink.send(event).await.map_err(|_| ChainError::SinkClosed)?;
                }
                LiveItem::Disconnect => return Ok(()),
            }
        }
        Ok(())
    }
}
