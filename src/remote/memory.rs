//! In-memory document store
//!
//! Reference [`DocumentStore`] backed by `DashMap`, with the server-side
//! semantics the engine relies on: server-assigned ids and timestamps on
//! create, shallow upsert merge, newest-first history append with a
//! per-collection cap, and snapshot push to live subscribers in apply order.
//!
//! Doubles as the test backend: faults can be scripted against the next
//! write calls, including the "timed out but actually landed" case that
//! produces double-appends under retry.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::history;
use crate::remote::subscription::{self, SnapshotEvent, Subscription, SubscriptionHandle};
use crate::remote::{DocumentStore, ENVIRONMENTS};

/// Which write operation a scripted fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Merge,
    AppendHistory,
}

/// A scripted failure for an upcoming write call.
#[derive(Debug, Clone)]
struct Fault {
    /// Restrict the fault to one operation kind; `None` matches any write
    op: Option<WriteOp>,
    error: SyncError,
    /// Apply the write anyway before failing - models a response lost in
    /// transit after the server already committed.
    apply_anyway: bool,
}

struct Subscriber {
    tx: mpsc::UnboundedSender<SnapshotEvent>,
    handle: SubscriptionHandle,
}

/// In-memory remote document store.
pub struct InMemoryStore {
    documents: DashMap<String, Value>,
    subscribers: DashMap<String, Vec<Subscriber>>,
    faults: Mutex<VecDeque<Fault>>,
    environment_history_cap: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            subscribers: DashMap::new(),
            faults: Mutex::new(VecDeque::new()),
            environment_history_cap: history::ENVIRONMENT_HISTORY_CAP,
        }
    }

    fn path(collection: &str, key: &str) -> String {
        format!("{}/{}", collection, key)
    }

    /// History cap for a collection; only environments are bounded.
    fn history_cap(&self, collection: &str) -> Option<usize> {
        (collection == ENVIRONMENTS).then_some(self.environment_history_cap)
    }

    /// Queue an error for the next write call (`create`/`merge`/`append_history`).
    pub fn inject_fault(&self, error: SyncError) {
        self.push_fault(Fault {
            op: None,
            error,
            apply_anyway: false,
        });
    }

    /// Queue an error for the next write of one specific operation kind.
    pub fn inject_fault_on(&self, op: WriteOp, error: SyncError) {
        self.push_fault(Fault {
            op: Some(op),
            error,
            apply_anyway: false,
        });
    }

    /// Queue an error that fires *after* the write is applied - the caller
    /// sees a failure but the store has already committed.
    pub fn inject_fault_after_apply(&self, error: SyncError) {
        self.push_fault(Fault {
            op: None,
            error,
            apply_anyway: true,
        });
    }

    /// Like [`inject_fault_after_apply`](Self::inject_fault_after_apply),
    /// restricted to one operation kind.
    pub fn inject_fault_on_after_apply(&self, op: WriteOp, error: SyncError) {
        self.push_fault(Fault {
            op: Some(op),
            error,
            apply_anyway: true,
        });
    }

    fn push_fault(&self, fault: Fault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push_back(fault);
        }
    }

    /// Push a terminal error to every subscriber of one document.
    pub fn fail_subscription(&self, collection: &str, key: &str, error: SyncError) {
        let path = Self::path(collection, key);
        if let Some((_, subs)) = self.subscribers.remove(&path) {
            for sub in subs {
                if sub.handle.is_active() {
                    let _ = sub.tx.send(SnapshotEvent::Error(error.clone()));
                }
            }
        }
    }

    /// Direct read of a stored document, bypassing the client. Test hook.
    pub fn raw_document(&self, collection: &str, key: &str) -> Option<Value> {
        self.documents
            .get(&Self::path(collection, key))
            .map(|doc| doc.clone())
    }

    /// Pop the first queued fault matching `op`, if any.
    fn take_fault(&self, op: WriteOp) -> Option<Fault> {
        let mut faults = self.faults.lock().ok()?;
        let index = faults
            .iter()
            .position(|f| f.op.is_none() || f.op == Some(op))?;
        faults.remove(index)
    }

    /// Fan the current snapshot out to live subscribers, pruning dead ones.
    fn publish(&self, path: &str) {
        let event = match self.documents.get(path) {
            Some(doc) => SnapshotEvent::Snapshot(doc.clone()),
            None => SnapshotEvent::Missing,
        };
        if let Some(mut subs) = self.subscribers.get_mut(path) {
            subs.retain(|sub| {
                sub.handle.is_active() && sub.tx.send(event.clone()).is_ok()
            });
        }
    }

    /// Run one write under fault scripting. `commit` performs the actual
    /// mutation and returns the value the caller would get.
    fn write<T>(&self, op: WriteOp, path: &str, commit: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        match self.take_fault(op) {
            Some(fault) if fault.apply_anyway => {
                let _ = commit(self)?;
                self.publish(path);
                Err(fault.error)
            }
            Some(fault) => Err(fault.error),
            None => {
                let value = commit(self)?;
                self.publish(path);
                Ok(value)
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryStore {
    async fn fetch(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.raw_document(collection, key))
    }

    async fn create(&self, collection: &str, doc: Value) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        let path = Self::path(collection, &id);
        let now = Utc::now();

        self.write(WriteOp::Create, &path, |store| {
            let mut doc = doc;
            if let Some(fields) = doc.as_object_mut() {
                fields.insert("createdAt".into(), json!(now));
                fields.insert("updatedAt".into(), json!(now));
            }
            debug!(collection, id = %id, "created document");
            store.documents.insert(path.clone(), doc);
            Ok(id.clone())
        })
    }

    async fn merge(&self, collection: &str, key: &str, patch: Value) -> Result<()> {
        let path = Self::path(collection, key);
        self.write(WriteOp::Merge, &path, |store| {
            let mut entry = store
                .documents
                .entry(path.clone())
                .or_insert_with(|| json!({}));
            if let (Some(target), Some(fields)) = (entry.as_object_mut(), patch.as_object()) {
                for (name, value) in fields {
                    target.insert(name.clone(), value.clone());
                }
                target.insert("updatedAt".into(), json!(Utc::now()));
            }
            debug!(collection, key, "merged document fields");
            Ok(())
        })
    }

    async fn append_history(&self, collection: &str, key: &str, entry: Value) -> Result<()> {
        let path = Self::path(collection, key);
        let cap = self.history_cap(collection);
        self.write(WriteOp::AppendHistory, &path, |store| {
            let mut doc = store
                .documents
                .get_mut(&path)
                .ok_or_else(|| SyncError::NotFound(format!("{}/{}", collection, key)))?;
            let existing = doc
                .get("history")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let next = history::prepend(entry, &existing, cap);
            if let Some(fields) = doc.as_object_mut() {
                fields.insert("history".into(), Value::Array(next));
                fields.insert("updatedAt".into(), json!(Utc::now()));
            }
            debug!(collection, key, "appended history entry");
            Ok(())
        })
    }

    async fn subscribe(&self, collection: &str, key: &str) -> Subscription {
        let path = Self::path(collection, key);
        let (tx, sub) = subscription::channel();
        let handle = sub.handle();

        // The entry guard is held across the snapshot read and the
        // registration; `publish` blocks on the same entry, so a write
        // cannot land between the two and go undelivered.
        let mut subs = self.subscribers.entry(path.clone()).or_default();
        let first = match self.documents.get(&path) {
            Some(doc) => SnapshotEvent::Snapshot(doc.clone()),
            None => SnapshotEvent::Missing,
        };
        let _ = tx.send(first);
        subs.push(Subscriber { tx, handle });
        sub
    }
}
