//! Synchronization core
//!
//! [`SyncEngine`] is what screens talk to: validate, apply optimistically,
//! write remotely through the retry scheduler, then confirm or roll back.
//! [`ReconciliationEngine`] runs on the other side of the loop, folding
//! push-delivered snapshots back into the local projection.

pub mod engine;
pub mod reconcile;

pub use engine::{ProgressUpdate, SaveOutcome, SyncEngine};
pub use reconcile::{LoadPhase, ReconciliationEngine, SyncTarget};
