//! growsync - optimistic synchronization engine for the grow journal
//!
//! Users track cultivation attempts ("grows") and ambient environment
//! readings; the data lives in a remote document store behind an unreliable
//! network. This crate is the client-side core that makes that feel
//! instant:
//!
//! - **retry**: bounded exponential-backoff retry for remote writes
//! - **history**: pure newest-first history insertion with optional cap
//! - **remote**: document store seam, typed client, push subscriptions
//! - **store**: optimistic in-memory projection with temporary ids
//! - **sync**: orchestration and remote-snapshot reconciliation
//!
//! Rendering, navigation, auth and process bootstrap are external
//! collaborators; construct a [`SyncEngine`] with a [`Session`] for the
//! authenticated user and a [`remote::DocumentStore`] for the backend.

pub mod config;
pub mod error;
pub mod history;
pub mod keys;
pub mod model;
pub mod remote;
pub mod retry;
pub mod session;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use keys::DocKey;
pub use model::{EnvironmentRecord, Grow, GrowDraft, GrowStage, Reading, ReadingInput, StageEvent};
pub use retry::RetryPolicy;
pub use session::{Session, UserId};
pub use store::LocalStateStore;
pub use sync::{ProgressUpdate, SaveOutcome, SyncEngine};
