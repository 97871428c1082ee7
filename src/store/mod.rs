//! Local state projection
//!
//! The in-memory view of the user's data that the UI observes. All writes
//! go through the optimistic-apply / confirm / rollback protocol; the
//! reconciliation engine is the only other writer, and it re-applies
//! unconfirmed optimistic mutations on top of every remote snapshot.

pub mod local;

pub use local::{
    EnvironmentUpdate, GrowUpdate, LocalStateStore, MutationToken,
};
