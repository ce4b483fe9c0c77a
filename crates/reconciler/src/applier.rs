//! Atomic pending to confirmed settlement.

use chrono::Utc;
use common::RetryPolicy;
use domain::{ConfirmedPayment, PaymentEvent, Transaction};
use payment_store::{PaymentStore, SettlementOutcome, StoreError};

/// Settles a matched payment through the store.
///
/// The store performs the whole settlement (status, order items, stock,
/// summary, cart) as one atomic write and re-checks the status under its
/// lock, so applying the same event twice is a no-op.
pub struct SettlementApplier<S: PaymentStore> {
    store: S,
    retry: RetryPolicy,
}

impl<S: PaymentStore> SettlementApplier<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Confirms `transaction` with the hash, block and amount from `event`.
    ///
    /// Transient store failures are retried; the settlement rolls back on
    /// each failed attempt so the transaction stays pending.
    #[tracing::instrument(skip_all, fields(transaction_id = %transaction.id, tx_hash = %event.tx_hash))]
    pub async fn apply(
        &self,
        transaction: &Transaction,
        event: &PaymentEvent,
    ) -> Result<SettlementOutcome, StoreError> {
        let started = std::time::Instant::now();
        let outcome = self
            .retry
            .retry(
                "settle",
                || {
                    self.store.settle(
                        transaction.id,
                        ConfirmedPayment {
                            tx_hash: event.tx_hash.clone(),
                            amount: event.amount,
                            block_number: event.block_number,
                            confirmed_at: Utc::now(),
                        },
                    )
                },
                StoreError::is_transient,
            )
            .await?;

        if let SettlementOutcome::Settled {
            transaction: settled,
            order_items,
        } = &outcome
        {
            metrics::counter!("reconciler_settlements_total").increment(1);
            metrics::histogram!("reconciler_settlement_duration_seconds")
                .record(started.elapsed().as_secs_f64());
            tracing::info!(
                amount = %settled.amount,
                token = %settled.token,
                block = event.block_number,
                order_items = order_items.len(),
                "Payment settled"
            );
        }
        Ok(outcome)
    }
}
