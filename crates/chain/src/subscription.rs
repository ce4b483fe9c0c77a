//! Long-lived `PaymentReceived` subscription with reconnection.

use std::sync::Arc;

use common::RetryPolicy;
use domain::PaymentEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::ChainClient;
use crate::error::ChainError;

/// Keeps a live subscription open until `shutdown` is cancelled or the
/// receiving side of `sink` is dropped.
///
/// A subscription that ends or fails to connect is re-established after the
/// policy's backoff. The backoff resets once a subscription was established
/// and then ended cleanly.
pub fn spawn_subscription(
    client: Arc<dyn ChainClient>,
    sink: mpsc::Sender<PaymentEvent>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempt: u32 = 0;
        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = client.stream_payments(sink.clone()) => result,
            };

            match result {
                Ok(()) => {
                    tracing::warn!("Payment subscription closed, reconnecting");
                    attempt = 0;
                }
                Err(ChainError::SinkClosed) => {
                    tracing::info!("Payment event consumer is gone, stopping subscription");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "Payment subscription failed");
                }
            }

            metrics::counter!("reconciler_subscription_reconnects_total").increment(1);
            let delay = policy.delay_for(attempt);
            attempt = attempt.saturating_add(1);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!("Payment subscription task stopped");
    })
}
