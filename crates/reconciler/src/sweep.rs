//! Sweep loop: periodic batch reconciliation of stale pending transactions.
//!
//! The sweep is the backstop for events the live subscription missed while
//! disconnected. Each pass:
//! 1. loads pending transactions older than the grace period
//! 2. narrows the block range with the receipt when a hash is known,
//!    otherwise searches from the block the transaction was created in
//! 3. fetches `PaymentReceived` events for the transaction id and wallet,
//!    in chunks no wider than the provider's block range limit
//! 4. runs the correlator, earliest event first
//! 5. fails transactions past the expiry window that have no event

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chain::{ChainClient, PaymentFilter};
use chrono::{DateTime, Utc};
use common::TransactionId;
use domain::{PaymentEvent, Transaction};
use payment_store::{FailOutcome, PaymentStore, PaymentStoreExt};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::correlator::{Correlation, Correlator};
use crate::error::{ReconcileError, Result};
use crate::health::EngineHealth;

/// Counts of one sweep pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SweepReport {
    pub examined: usize,
    pub confirmed: usize,
    /// Failed because retries ran out or the payment arrived after failure.
    pub failed: usize,
    /// Failed because no event appeared within the expiry window.
    pub expired: usize,
    pub untouched: usize,
    pub errors: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of reconciling a single transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    Correlated(Correlation),
    /// Pending past the expiry window with no matching event; now failed.
    Expired(TransactionId),
    /// No usable event yet; left pending.
    NoEvent(TransactionId),
    /// The transaction was no longer pending when checked.
    NotPending(Transaction),
}

/// Sweep timing and search range.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub interval: Duration,
    pub grace: chrono::Duration,
    pub expiry: chrono::Duration,
    pub start_block: u64,
    /// Widest block range of a single log query.
    pub max_block_range: u64,
}

/// Events may be mined shortly before the intent row is written.
const CREATION_LOOKBACK_MINUTES: i64 = 10;

pub struct SweepReconciler<S: PaymentStore> {
    store: S,
    chain: Arc<dyn ChainClient>,
    correlator: Arc<Correlator<S>>,
    settings: SweepSettings,
    health: EngineHealth,
    /// First block searched for each pending transaction.
    search_starts: RwLock<HashMap<TransactionId, u64>>,
}

impl<S: PaymentStore> SweepReconciler<S> {
    pub fn new(
        store: S,
        chain: Arc<dyn ChainClient>,
        correlator: Arc<Correlator<S>>,
        settings: SweepSettings,
        health: EngineHealth,
    ) -> Self {
        Self {
            store,
            chain,
            correlator,
            settings,
            health,
            search_starts: RwLock::new(HashMap::new()),
        }
    }

    /// Sweeps every `interval`, starting immediately, until `shutdown`.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.settings.interval.as_secs(), "Sweep started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sweep_once().await {
                Ok(report) => self.health.record_sweep(report).await,
                Err(e) => {
                    metrics::counter!("reconciler_errors_total", "loop" => "sweep").increment(1);
                    tracing::error!(error = %e, "Sweep pass failed");
                }
            }
        }
        tracing::info!("Sweep stopped");
    }

    /// Runs one pass over stale pending transactions.
    ///
    /// Failures on individual transactions are counted and do not stop the
    /// pass; only failing to list pending transactions is an error.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let started = std::time::Instant::now();
        let now = Utc::now();
        let mut report = SweepReport {
            started_at: now,
            ..Default::default()
        };

        let stale = self
            .store
            .get_pending_older_than(self.settings.grace, now)
            .await?;

        let swept: HashSet<_> = stale.iter().map(|t| t.id).collect();
        for transaction in stale {
            report.examined += 1;
            match self.reconcile(&transaction, now).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(transaction_id = %transaction.id, error = %e, "Failed to reconcile transaction");
                }
            }
        }

        self.search_starts
            .write()
            .await
            .retain(|id, _| swept.contains(id));

        report.finished_at = Utc::now();
        metrics::histogram!("reconciler_sweep_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        metrics::counter!("reconciler_sweep_expired_total").increment(report.expired as u64);
        tracing::info!(
            examined = report.examined,
            confirmed = report.confirmed,
            failed = report.failed,
            expired = report.expired,
            untouched = report.untouched,
            errors = report.errors,
            "Sweep pass finished"
        );
        Ok(report)
    }

    /// Reconciles one transaction immediately, regardless of its age.
    #[tracing::instrument(skip(self))]
    pub async fn check_transaction(&self, id: TransactionId) -> Result<SweepOutcome> {
        let transaction = self
            .store
            .get_transaction(id)
            .await?
            .ok_or(ReconcileError::TransactionNotFound(id))?;

        if !transaction.is_pending() {
            return Ok(SweepOutcome::NotPending(transaction));
        }
        self.reconcile(&transaction, Utc::now()).await
    }

    async fn reconcile(&self, transaction: &Transaction, now: DateTime<Utc>) -> Result<SweepOutcome> {
        let mut events = self.find_events(transaction).await?;
        metrics::counter!("reconciler_events_received_total", "source" => "sweep")
            .increment(events.len() as u64);

        if let Some(correlation) = self
            .correlator
            .correlate_first(transaction, &mut events)
            .await?
            && correlation.is_final()
        {
            return Ok(SweepOutcome::Correlated(correlation));
        }

        if transaction.age(now) > self.settings.expiry {
            return match self.store.mark_failed(transaction.id).await? {
                FailOutcome::Failed(_) => {
                    tracing::info!(transaction_id = %transaction.id, "Pending transaction expired");
                    Ok(SweepOutcome::Expired(transaction.id))
                }
                FailOutcome::NotPending(current) => Ok(SweepOutcome::NotPending(current)),
            };
        }
        Ok(SweepOutcome::NoEvent(transaction.id))
    }

    /// Fetches candidate events for a pending transaction.
    async fn find_events(&self, transaction: &Transaction) -> Result<Vec<PaymentEvent>> {
        let filter =
            PaymentFilter::for_payment(transaction.id, transaction.wallet_address.clone());

        if let Some(hash) = &transaction.tx_hash {
            match self.chain.get_receipt(hash).await? {
                Some(receipt) if receipt.success => {
                    let filter = filter.in_block(receipt.block_number);
                    return Ok(self.chain.get_payment_events(&filter).await?);
                }
                Some(receipt) => {
                    tracing::warn!(
                        transaction_id = %transaction.id,
                        %hash,
                        block = receipt.block_number,
                        "Payment transaction reverted"
                    );
                    return Ok(Vec::new());
                }
                // Not mined yet, or the hash is not the payment itself
                None => {}
            }
        }

        self.search_since_creation(transaction, filter).await
    }

    /// Searches from the transaction's creation block to the chain head,
    /// one bounded chunk at a time.
    async fn search_since_creation(
        &self,
        transaction: &Transaction,
        filter: PaymentFilter,
    ) -> Result<Vec<PaymentEvent>> {
        let latest = self.chain.latest_block().await?;
        let from = self.search_start(transaction, latest).await?;

        let mut events = Vec::new();
        for (start, end) in block_chunks(from, latest, self.settings.max_block_range) {
            let chunk = filter.clone().from_block(start).to_block(end);
            events.extend(self.chain.get_payment_events(&chunk).await?);
        }
        Ok(events)
    }

    async fn search_start(&self, transaction: &Transaction, latest: u64) -> Result<u64> {
        if let Some(block) = self.search_starts.read().await.get(&transaction.id) {
            return Ok(*block);
        }
        let since = transaction.created_at - chrono::Duration::minutes(CREATION_LOOKBACK_MINUTES);
        let block = self.last_block_before(since, latest).await?;
        tracing::debug!(transaction_id = %transaction.id, block, "Search start resolved");
        self.search_starts.write().await.insert(transaction.id, block);
        Ok(block)
    }

    /// Binary search for the last block mined at or before `since`. Falls
    /// back to the configured start block when timestamps are unavailable.
    async fn last_block_before(&self, since: DateTime<Utc>, latest: u64) -> Result<u64> {
        let (mut low, mut high) = (self.settings.start_block, latest);
        if low >= high {
            return Ok(low);
        }
        match self.chain.block_timestamp(low).await? {
            Some(at) if at <= since => {}
            _ => return Ok(low),
        }

        while low < high {
            let mid = low + (high - low).div_ceil(2);
            match self.chain.block_timestamp(mid).await? {
                Some(at) if at <= since => low = mid,
                Some(_) => high = mid - 1,
                None => return Ok(self.settings.start_block),
            }
        }
        Ok(low)
    }
}

/// Splits `from..=to` into inclusive ranges of at most `size` blocks.
fn block_chunks(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(size - 1).min(to);
        chunks.push((start, end));
        if end == to {
            break;
        }
        start = end + 1;
    }
    chunks
}

impl SweepReport {
    fn record(&mut self, outcome: &SweepOutcome) {
        match outcome {
            SweepOutcome::Correlated(Correlation::Confirmed { .. }) => self.confirmed += 1,
            SweepOutcome::Correlated(
                Correlation::MarkedFailed(_) | Correlation::LatePayment(_),
            ) => self.failed += 1,
            SweepOutcome::Expired(_) => self.expired += 1,
            _ => self.untouched += 1,
        }
    }
}
