use std::time::Duration;

use common::RetryPolicy;

/// Tuning of the reconciliation engine.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Backoff for looking up a transaction the event arrived before.
    pub lookup_retry: RetryPolicy,
    /// Backoff for transient store failures during settlement.
    pub store_retry: RetryPolicy,
    /// Backoff between live subscription reconnects.
    pub reconnect: RetryPolicy,
    pub sweep_interval: Duration,
    /// Pending transactions younger than this are left to the live loop.
    pub sweep_grace: chrono::Duration,
    /// Pending transactions older than this with no event are failed.
    pub pending_expiry: chrono::Duration,
    /// First block searched when no receipt narrows the range.
    pub start_block: u64,
    /// Widest block range the provider accepts in one log query.
    pub max_block_range: u64,
    pub event_buffer: usize,
    /// Pause before restarting a loop that panicked.
    pub restart_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            lookup_retry: RetryPolicy::new(5, Duration::from_secs(5), Duration::from_secs(300)),
            store_retry: RetryPolicy::new(3, Duration::from_millis(200), Duration::from_secs(2)),
            reconnect: RetryPolicy::unbounded(Duration::from_secs(1), Duration::from_secs(60)),
            sweep_interval: Duration::from_secs(300),
            sweep_grace: chrono::Duration::minutes(1),
            pending_expiry: chrono::Duration::hours(1),
            start_block: 0,
            max_block_range: 2_000,
            event_buffer: 1024,
            restart_delay: Duration::from_secs(1),
        }
    }
}
