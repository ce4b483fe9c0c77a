//! Payment reconciliation engine.
//!
//! Matches `PaymentReceived` events emitted by the payment contract to
//! pending payment intents and settles them:
//! 1. Correlate the event with a stored transaction (id, sender, token)
//! 2. Settle atomically: confirm, materialize order items, adjust stock
//! 3. Fail intents that never receive a payment
//!
//! Two loops drive correlation: a live loop fed by a chain subscription and
//! a periodic sweep that catches anything the live loop missed. Both are
//! idempotent, so they may race on the same transaction.

pub mod applier;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod health;
pub mod intake;
pub mod live;
pub mod sweep;

pub use applier::SettlementApplier;
pub use config::ReconcilerConfig;
pub use correlator::{Correlation, Correlator, IntegrityViolation, validate};
pub use engine::{EngineHandle, ReconciliationEngine, supervise};
pub use error::{IntakeError, ReconcileError, Result};
pub use health::{EngineHealth, HealthSnapshot, LoopKind, LoopStatus};
pub use intake::PaymentIntake;
pub use live::LiveReconciler;
pub use sweep::{SweepOutcome, SweepReconciler, SweepReport, SweepSettings};
