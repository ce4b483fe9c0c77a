//! Liveness of the reconciliation loops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::sweep::SweepReport;

/// Liveness of one supervised loop.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LoopStatus {
    pub running: bool,
    /// Restarts after a panic.
    pub restarts: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct HealthSnapshot {
    pub live: LoopStatus,
    pub sweep: LoopStatus,
    pub last_sweep: Option<SweepReport>,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.live.running && self.sweep.running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Live,
    Sweep,
}

impl LoopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::Live => "live",
            LoopKind::Sweep => "sweep",
        }
    }
}

/// Shared, cloneable health record updated by the loops and read by the
/// health endpoint.
#[derive(Debug, Clone, Default)]
pub struct EngineHealth {
    inner: Arc<RwLock<HealthSnapshot>>,
}

impl EngineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn set_running(&self, kind: LoopKind, running: bool) {
        let mut health = self.inner.write().await;
        health.status_mut(kind).running = running;
    }

    pub async fn record_restart(&self, kind: LoopKind) {
        let mut health = self.inner.write().await;
        health.status_mut(kind).restarts += 1;
    }

    /// Notes that the live loop received an event.
    pub async fn record_event(&self) {
        self.inner.write().await.live.last_activity = Some(Utc::now());
    }

    pub async fn record_sweep(&self, report: SweepReport) {
        let mut health = self.inner.write().await;
        health.sweep.last_activity = Some(report.finished_at);
        health.last_sweep = Some(report);
    }
}

impl HealthSnapshot {
    fn status_mut(&mut self, kind: LoopKind) -> &mut LoopStatus {
        match kind {
            LoopKind::Live => &mut self.live,
            LoopKind::Sweep => &mut self.sweep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthy_only_when_both_loops_run() {
        let health = EngineHealth::new();
        assert!(!health.snapshot().await.is_healthy());

        health.set_running(LoopKind::Live, true).await;
        health.set_running(LoopKind::Sweep, true).await;
        health.record_restart(LoopKind::Sweep).await;

        let snapshot = health.snapshot().await;
        assert!(snapshot.is_healthy());
        assert_eq!(snapshot.sweep.restarts, 1);
        assert_eq!(snapshot.live.restarts, 0);
    }
}
