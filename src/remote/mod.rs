//! Remote document store access
//!
//! [`DocumentStore`] is the seam to the backing service: untyped JSON
//! documents in named collections, with a push subscription per document.
//! [`RemoteSyncClient`] is the typed facade the engine uses; it serializes
//! the domain types, maps missing documents to errors, and enforces
//! ownership. [`InMemoryStore`] is the reference backend used in tests.

pub mod client;
pub mod memory;
pub mod subscription;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use client::{EnvironmentPatch, GrowPatch, RemoteSyncClient};
pub use memory::{InMemoryStore, WriteOp};
pub use subscription::{SnapshotEvent, Subscription, SubscriptionHandle};

/// Collection holding grow documents, keyed by server-assigned id.
pub const GROWS: &str = "grows";

/// Collection holding environment documents, keyed by owner id.
pub const ENVIRONMENTS: &str = "environments";

/// Untyped document operations against the remote store.
///
/// `create`, `merge` and `append_history` follow the fatal/retryable error
/// taxonomy and are wrapped by the retry scheduler at the call site.
/// `subscribe` is never retried here; reconnection is the transport's
/// problem.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document, `None` if it does not exist.
    async fn fetch(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Create a document with a server-assigned id and timestamps.
    ///
    /// No uniqueness check: every call creates a new document.
    async fn create(&self, collection: &str, doc: Value) -> Result<String>;

    /// Shallow field merge; fields not named in `patch` are untouched.
    /// Upserts when the document does not exist yet.
    async fn merge(&self, collection: &str, key: &str, patch: Value) -> Result<()>;

    /// Atomically add one entry to the document's `history` field without
    /// reading it first. Additive and commutative server-side; **not**
    /// idempotent - a retried call that already landed appends again.
    async fn append_history(&self, collection: &str, key: &str, entry: Value) -> Result<()>;

    /// Open a push channel for one document. The first event fires
    /// immediately with the current state (or [`SnapshotEvent::Missing`]),
    /// then once per subsequent change, in apply order.
    async fn subscribe(&self, collection: &str, key: &str) -> Subscription;
}
