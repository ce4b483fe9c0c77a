//! Matching of decoded payment events to stored payment intents.

use std::fmt;

use common::{ChainAddress, RetryPolicy, TransactionId, TxHash};
use domain::{PaymentEvent, Transaction, TransactionStatus};
use payment_store::{FailOutcome, PaymentStore, SettlementOutcome, StoreError};
use tokio_util::sync::CancellationToken;

use crate::applier::SettlementApplier;
use crate::error::Result;

/// Why an event was rejected for the transaction it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    SenderMismatch {
        expected: ChainAddress,
        actual: ChainAddress,
    },
    TokenMismatch {
        expected: String,
        actual: String,
    },
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityViolation::SenderMismatch { expected, actual } => {
                write!(f, "sender {actual} is not the paying wallet {expected}")
            }
            IntegrityViolation::TokenMismatch { expected, actual } => {
                write!(f, "token {actual} does not match quoted token {expected}")
            }
        }
    }
}

/// What happened to a payment event.
#[derive(Debug, Clone, PartialEq)]
pub enum Correlation {
    /// The transaction was confirmed and its cart settled.
    Confirmed {
        transaction: Transaction,
        order_items: usize,
    },

    /// The transaction was already confirmed; duplicate delivery.
    AlreadyConfirmed(TransactionId),

    /// The transaction had already failed; the payment arrived too late.
    LatePayment(TransactionId),

    /// Sender or token contradict the stored transaction, which stays pending.
    IntegrityFailure {
        id: TransactionId,
        violation: IntegrityViolation,
    },

    /// The event's hash is already owned by another transaction.
    DuplicateHash { id: TransactionId, hash: TxHash },

    /// The lookup budget ran out and the transaction found by id and sender
    /// was marked failed.
    MarkedFailed(TransactionId),

    /// No transaction exists for the event.
    Discarded(TransactionId),

    /// Shutdown interrupted the lookup; the sweep will pick the event up.
    Interrupted(TransactionId),
}

impl Correlation {
    /// Returns true if no later event for the same transaction can change
    /// its state.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Correlation::Confirmed { .. }
                | Correlation::AlreadyConfirmed(_)
                | Correlation::LatePayment(_)
                | Correlation::MarkedFailed(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Correlation::Confirmed { .. } => "confirmed",
            Correlation::AlreadyConfirmed(_) => "already_confirmed",
            Correlation::LatePayment(_) => "late_payment",
            Correlation::IntegrityFailure { .. } => "integrity_failure",
            Correlation::DuplicateHash { .. } => "duplicate_hash",
            Correlation::MarkedFailed(_) => "marked_failed",
            Correlation::Discarded(_) => "discarded",
            Correlation::Interrupted(_) => "interrupted",
        }
    }
}

/// Checks an event against the transaction it names.
pub fn validate(transaction: &Transaction, event: &PaymentEvent) -> Option<IntegrityViolation> {
    if !event.is_from(&transaction.wallet_address) {
        return Some(IntegrityViolation::SenderMismatch {
            expected: transaction.wallet_address.clone(),
            actual: event.sender.clone(),
        });
    }
    if !event.pays_in(&transaction.token) {
        return Some(IntegrityViolation::TokenMismatch {
            expected: transaction.token.clone(),
            actual: event.token_symbol.clone(),
        });
    }
    None
}

/// Decides which transaction an event satisfies and settles it.
///
/// The event's transaction id is authoritative. Events can arrive before the
/// transaction row is written, so a missing row is retried with the lookup
/// policy before giving up.
pub struct Correlator<S: PaymentStore> {
    store: S,
    applier: SettlementApplier<S>,
    lookup_retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl<S: PaymentStore + Clone> Correlator<S> {
    pub fn new(store: S, lookup_retry: RetryPolicy, store_retry: RetryPolicy) -> Self {
        Self {
            applier: SettlementApplier::new(store.clone(), store_retry),
            store,
            lookup_retry,
            shutdown: CancellationToken::new(),
        }
    }

    /// Lets `shutdown` interrupt lookup backoff. Settlements already started
    /// always run to completion.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

impl<S: PaymentStore> Correlator<S> {
    /// Correlates a live event: looks the transaction up by id, then
    /// validates and settles it.
    #[tracing::instrument(skip_all, fields(transaction_id = %event.transaction_id, tx_hash = %event.tx_hash))]
    pub async fn correlate(&self, event: &PaymentEvent) -> Result<Correlation> {
        let id = event.transaction_id;
        let mut attempt: u32 = 0;

        let transaction = loop {
            if let Some(transaction) = self.store.get_transaction(id).await? {
                break transaction;
            }
            attempt += 1;
            if !self.lookup_retry.allows_another(attempt) {
                return self.exhausted(event).await;
            }

            let delay = self.lookup_retry.delay_for(attempt - 1);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Transaction not stored yet");
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(Correlation::Interrupted(id)),
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.correlate_with(&transaction, event).await
    }

    /// Validates `event` against an already loaded transaction and settles
    /// it if the transaction is still pending.
    pub async fn correlate_with(
        &self,
        transaction: &Transaction,
        event: &PaymentEvent,
    ) -> Result<Correlation> {
        let id = transaction.id;

        if let Some(violation) = validate(transaction, event) {
            metrics::counter!("reconciler_integrity_failures_total").increment(1);
            tracing::warn!(transaction_id = %id, %violation, "Rejected payment event");
            return Ok(Correlation::IntegrityFailure { id, violation });
        }

        match transaction.status {
            TransactionStatus::Confirmed => {
                tracing::debug!(transaction_id = %id, "Transaction already confirmed");
                return Ok(Correlation::AlreadyConfirmed(id));
            }
            TransactionStatus::Failed => {
                tracing::warn!(transaction_id = %id, tx_hash = %event.tx_hash, "Payment arrived for failed transaction");
                return Ok(Correlation::LatePayment(id));
            }
            TransactionStatus::Pending => {}
        }

        match self.applier.apply(transaction, event).await {
            Ok(SettlementOutcome::Settled {
                transaction,
                order_items,
            }) => Ok(Correlation::Confirmed {
                transaction,
                order_items: order_items.len(),
            }),
            Ok(SettlementOutcome::AlreadyConfirmed(_)) => Ok(Correlation::AlreadyConfirmed(id)),
            Ok(SettlementOutcome::NotPending(_)) => Ok(Correlation::LatePayment(id)),
            Err(StoreError::DuplicateHash { hash, owner }) => {
                tracing::warn!(transaction_id = %id, %hash, ?owner, "Event hash belongs to another transaction");
                Ok(Correlation::DuplicateHash { id, hash })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Correlates a batch of events, earliest on chain first, stopping at the
    /// first event that settles the transaction's fate.
    pub async fn correlate_first(
        &self,
        transaction: &Transaction,
        events: &mut [PaymentEvent],
    ) -> Result<Option<Correlation>> {
        events.sort_by_key(|e| e.position());
        let mut last = None;
        for event in events.iter().filter(|e| e.transaction_id == transaction.id) {
            let correlation = self.correlate_with(transaction, event).await?;
            if correlation.is_final() {
                return Ok(Some(correlation));
            }
            last = Some(correlation);
        }
        Ok(last)
    }

    async fn exhausted(&self, event: &PaymentEvent) -> Result<Correlation> {
        let id = event.transaction_id;
        match self.store.find_transaction(id, &event.sender).await? {
            Some(transaction) if transaction.is_pending() => {
                match self.store.mark_failed(id).await? {
                    FailOutcome::Failed(_) => {
                        tracing::warn!(transaction_id = %id, "Lookup retries exhausted, transaction marked failed");
                        Ok(Correlation::MarkedFailed(id))
                    }
                    FailOutcome::NotPending(current) => Ok(settled_state(&current)),
                }
            }
            Some(transaction) => Ok(settled_state(&transaction)),
            None => {
                tracing::warn!(transaction_id = %id, sender = %event.sender, "No transaction for payment event, discarding");
                Ok(Correlation::Discarded(id))
            }
        }
    }
}

fn settled_state(transaction: &Transaction) -> Correlation {
    match transaction.status {
        TransactionStatus::Confirmed => Correlation::AlreadyConfirmed(transaction.id),
        _ => Correlation::LatePayment(transaction.id),
    }
}
