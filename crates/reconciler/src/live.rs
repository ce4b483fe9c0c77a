//! Live loop: subscription events dispatched to the correlator.

use std::sync::Arc;

use chain::{ChainClient, spawn_subscription};
use common::RetryPolicy;
use domain::PaymentEvent;
use payment_store::PaymentStore;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::correlator::{Correlation, Correlator};
use crate::health::EngineHealth;

/// Receives decoded events from a reconnecting subscription and correlates
/// each one on its own task, so lookup backoff for one event never delays
/// another.
///
/// Tasks for the same transaction may run concurrently; they are serialized
/// only by the row lock [`PaymentStore::settle`] takes on the transaction.
pub struct LiveReconciler<S: PaymentStore> {
    correlator: Arc<Correlator<S>>,
    chain: Arc<dyn ChainClient>,
    reconnect: RetryPolicy,
    buffer: usize,
    health: EngineHealth,
}

impl<S: PaymentStore + 'static> LiveReconciler<S> {
    pub fn new(
        correlator: Arc<Correlator<S>>,
        chain: Arc<dyn ChainClient>,
        reconnect: RetryPolicy,
        buffer: usize,
        health: EngineHealth,
    ) -> Self {
        Self {
            correlator,
            chain,
            reconnect,
            buffer: buffer.max(1),
            health,
        }
    }

    /// Runs until `shutdown` is cancelled, then waits for in-flight
    /// correlations to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        let (tx, mut rx) = mpsc::channel(self.buffer);
        let subscription = spawn_subscription(
            self.chain.clone(),
            tx,
            self.reconnect,
            shutdown.child_token(),
        );
        let mut in_flight = JoinSet::new();
        tracing::info!("Live reconciliation started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Some(event) => {
                        self.health.record_event().await;
                        let correlator = self.correlator.clone();
                        in_flight.spawn(async move { handle_event(&correlator, event).await });
                    }
                    None => break,
                },
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Correlation task panicked");
                }
            }
        }

        if let Err(e) = subscription.await {
            tracing::error!(error = %e, "Subscription task failed");
        }
        let pending = in_flight.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for in-flight correlations");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Correlation task panicked");
            }
        }
        tracing::info!("Live reconciliation stopped");
    }
}

async fn handle_event<S: PaymentStore>(correlator: &Correlator<S>, event: PaymentEvent) {
    metrics::counter!("reconciler_events_received_total", "source" => "live").increment(1);

    match correlator.correlate(&event).await {
        Ok(correlation) => {
            metrics::counter!("reconciler_correlations_total", "outcome" => correlation.label())
                .increment(1);
            if let Correlation::Confirmed { transaction, .. } = &correlation {
                tracing::info!(transaction_id = %transaction.id, "Live payment confirmed");
            }
        }
        Err(e) => {
            metrics::counter!("reconciler_errors_total", "loop" => "live").increment(1);
            // The sweep retries anything left pending
            tracing::error!(
                transaction_id = %event.transaction_id,
                tx_hash = %event.tx_hash,
                transient = e.is_transient(),
                error = %e,
                "Failed to reconcile live event"
            );
        }
    }
}
