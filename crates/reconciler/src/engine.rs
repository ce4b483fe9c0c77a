//! Supervised startup of the live and sweep loops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chain::ChainClient;
use payment_store::PaymentStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ReconcilerConfig;
use crate::correlator::Correlator;
use crate::health::{EngineHealth, LoopKind};
use crate::live::LiveReconciler;
use crate::sweep::{SweepReconciler, SweepSettings};

/// Wires the correlator and both loops over one store and chain client.
pub struct ReconciliationEngine<S: PaymentStore> {
    live: Arc<LiveReconciler<S>>,
    sweep: Arc<SweepReconciler<S>>,
    health: EngineHealth,
    restart_delay: Duration,
    shutdown: CancellationToken,
}

/// Running engine. Dropping it does not stop the loops; cancel the engine's
/// shutdown token and call [`join`](Self::join).
pub struct EngineHandle {
    live: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl EngineHandle {
    /// Waits for both loops to stop.
    pub async fn join(self) {
        for (name, handle) in [("live", self.live), ("sweep", self.sweep)] {
            if let Err(e) = handle.await {
                tracing::error!(loop_name = name, error = %e, "Supervisor task failed");
            }
        }
    }
}

impl<S: PaymentStore + Clone + 'static> ReconciliationEngine<S> {
    /// Builds the engine. `shutdown` stops both loops and interrupts lookup
    /// backoff of in-flight live events.
    pub fn new(
        store: S,
        chain: Arc<dyn ChainClient>,
        config: ReconcilerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let health = EngineHealth::new();
        let correlator = Arc::new(
            Correlator::new(store.clone(), config.lookup_retry, config.store_retry)
                .with_shutdown(shutdown.clone()),
        );

        let live = LiveReconciler::new(
            correlator.clone(),
            chain.clone(),
            config.reconnect,
            config.event_buffer,
            health.clone(),
        );
        let sweep = SweepReconciler::new(
            store,
            chain,
            correlator,
            SweepSettings {
                interval: config.sweep_interval,
                grace: config.sweep_grace,
                expiry: config.pending_expiry,
                start_block: config.start_block,
                max_block_range: config.max_block_range,
            },
            health.clone(),
        );

        Self {
            live: Arc::new(live),
            sweep: Arc::new(sweep),
            health,
            restart_delay: config.restart_delay,
            shutdown,
        }
    }

    pub fn health(&self) -> EngineHealth {
        self.health.clone()
    }

    /// Sweep entry point for on-demand checks.
    pub fn sweeper(&self) -> Arc<SweepReconciler<S>> {
        self.sweep.clone()
    }

    /// Starts both loops, each under its own supervisor.
    pub fn spawn(&self) -> EngineHandle {
        let live = {
            let live = self.live.clone();
            let shutdown = self.shutdown.clone();
            supervise(
                LoopKind::Live,
                self.health.clone(),
                self.restart_delay,
                self.shutdown.clone(),
                move || {
                    let live = live.clone();
                    let shutdown = shutdown.clone();
                    async move { live.run(shutdown).await }
                },
            )
        };
        let sweep = {
            let sweep = self.sweep.clone();
            let shutdown = self.shutdown.clone();
            supervise(
                LoopKind::Sweep,
                self.health.clone(),
                self.restart_delay,
                self.shutdown.clone(),
                move || {
                    let sweep = sweep.clone();
                    let shutdown = shutdown.clone();
                    async move { sweep.run(shutdown).await }
                },
            )
        };
        EngineHandle { live, sweep }
    }
}

/// Runs the loop built by `make` on its own task and restarts it after a
/// panic. A loop that returns normally is not restarted.
pub fn supervise<F, Fut>(
    kind: LoopKind,
    health: EngineHealth,
    restart_delay: Duration,
    shutdown: CancellationToken,
    make: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            health.set_running(kind, true).await;
            let result = tokio::spawn(make()).await;
            health.set_running(kind, false).await;

            match result {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    metrics::counter!("reconciler_loop_restarts_total", "loop" => kind.as_str())
                        .increment(1);
                    health.record_restart(kind).await;
                    tracing::error!(loop_name = kind.as_str(), "Reconciliation loop panicked, restarting");
                }
                Err(e) => {
                    tracing::error!(loop_name = kind.as_str(), error = %e, "Reconciliation loop cancelled");
                    break;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(restart_delay) => {}
            }
        }
    })
}
