//! Snapshot reconciliation
//!
//! Consumes push events from the remote store, in delivery order, and folds
//! them into the local projection. The store handles the merge policy
//! (wholesale replace, pending mutations re-applied); this module owns the
//! per-target load phase machine and the upsert-on-read side effect for a
//! missing environment record.
//!
//! Phases: `Unloaded -> Loading -> {Loaded, Error}`. `Loaded`
//! self-transitions on every snapshot. `Error` is terminal until the owning
//! screen opens a new subscription.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::keys::DocKey;
use crate::remote::{RemoteSyncClient, SnapshotEvent};
use crate::retry::RetryPolicy;
use crate::store::LocalStateStore;

/// What a subscription is watching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SyncTarget {
    Grow(DocKey),
    Environment,
}

/// Load phase of one sync target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Error,
}

/// Merges remote snapshots into the local projection.
pub struct ReconciliationEngine {
    store: Arc<LocalStateStore>,
    client: Arc<RemoteSyncClient>,
    retry: RetryPolicy,
    phases: Mutex<HashMap<SyncTarget, LoadPhase>>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<LocalStateStore>,
        client: Arc<RemoteSyncClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            client,
            retry,
            phases: Mutex::new(HashMap::new()),
        }
    }

    pub async fn phase(&self, target: &SyncTarget) -> LoadPhase {
        self.phases
            .lock()
            .await
            .get(target)
            .copied()
            .unwrap_or_default()
    }

    /// Mark a target as loading. Called when its subscription opens; also
    /// clears a terminal `Error` from a previous subscription.
    pub async fn begin(&self, target: SyncTarget) {
        self.phases.lock().await.insert(target, LoadPhase::Loading);
    }

    async fn set_phase(&self, target: SyncTarget, phase: LoadPhase) {
        self.phases.lock().await.insert(target, phase);
    }

    /// Fold one grow event into the projection.
    pub async fn apply_grow_event(&self, key: &DocKey, event: SnapshotEvent) {
        let target = SyncTarget::Grow(key.clone());
        match event {
            SnapshotEvent::Snapshot(doc) => match self.client.decode_grow(doc) {
                Ok(grow) => {
                    self.store.replace_grow_from_remote(key, grow).await;
                    self.set_phase(target, LoadPhase::Loaded).await;
                }
                Err(err) => {
                    error!(key = %key, error = %err, "grow snapshot rejected");
                    self.set_phase(target, LoadPhase::Error).await;
                }
            },
            SnapshotEvent::Missing => {
                if self.store.has_pending_create(key).await {
                    debug!(key = %key, "remote grow missing, creation in flight");
                } else {
                    warn!(key = %key, "remote grow disappeared, dropping projection");
                    self.store.remove_grow(key).await;
                }
                // The projection is answerable either way (optimistic copy
                // or confirmed absence), so the target counts as loaded.
                self.set_phase(target, LoadPhase::Loaded).await;
            }
            SnapshotEvent::Error(err) => {
                error!(key = %key, error = %err, "grow subscription failed");
                self.set_phase(target, LoadPhase::Error).await;
            }
        }
    }

    /// Fold one environment event into the projection.
    ///
    /// A missing remote record with no local optimistic state triggers
    /// upsert-on-read: the default record is installed locally right away
    /// and persisted in the background, off the read path.
    pub async fn apply_environment_event(&self, event: SnapshotEvent) {
        match event {
            SnapshotEvent::Snapshot(doc) => match self.client.decode_environment(doc) {
                Ok(record) => {
                    self.store.replace_environment_from_remote(record).await;
                    self.set_phase(SyncTarget::Environment, LoadPhase::Loaded).await;
                }
                Err(err) => {
                    error!(error = %err, "environment snapshot rejected");
                    self.set_phase(SyncTarget::Environment, LoadPhase::Error).await;
                }
            },
            SnapshotEvent::Missing => {
                if self.store.has_pending_environment().await {
                    debug!("remote environment missing, local mutation in flight");
                } else if self.store.install_default_environment().await {
                    info!("environment record missing remotely, persisting default");
                    let client = Arc::clone(&self.client);
                    let retry = self.retry.clone();
                    tokio::spawn(persist_default_environment(client, retry));
                }
                self.set_phase(SyncTarget::Environment, LoadPhase::Loaded).await;
            }
            SnapshotEvent::Error(err) => {
                error!(error = %err, "environment subscription failed");
                self.set_phase(SyncTarget::Environment, LoadPhase::Error).await;
            }
        }
    }

}

/// Background persist of the default environment record, retried like any
/// other write. Failure is logged and left alone: the local default stays,
/// and the next reading submission writes the document anyway.
async fn persist_default_environment(client: Arc<RemoteSyncClient>, retry: RetryPolicy) {
    let record = crate::model::EnvironmentRecord::empty();
    let result = retry
        .run(|| {
            let client = Arc::clone(&client);
            let record = record.clone();
            async move { client.put_environment(&record).await }
        })
        .await;
    if let Err(err) = result {
        warn!(error = %err, "failed to persist default environment record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::model::{EnvironmentRecord, Grow, GrowStage};
    use crate::remote::{DocumentStore, InMemoryStore, ENVIRONMENTS};
    use crate::session::{Session, UserId};
    use chrono::NaiveDate;

    fn harness() -> (Arc<InMemoryStore>, Arc<LocalStateStore>, Arc<ReconciliationEngine>) {
        let remote = Arc::new(InMemoryStore::new());
        let store = Arc::new(LocalStateStore::new(100));
        let client = Arc::new(RemoteSyncClient::new(
            Arc::clone(&remote) as Arc<dyn DocumentStore>,
            Session::new(UserId::new("user-1")),
        ));
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&store),
            client,
            RetryPolicy::default(),
        ));
        (remote, store, engine)
    }

    fn sample_grow() -> Grow {
        Grow {
            owner_id: UserId::new("user-1"),
            species: "Golden Teacher".into(),
            stage: GrowStage::Fruiting,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 15).expect("date"),
            notes: String::new(),
            history: vec![],
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_grow_snapshot_loads_projection() {
        let (_, store, engine) = harness();
        let key = DocKey::remote("g-1");
        engine.begin(SyncTarget::Grow(key.clone())).await;

        let doc = serde_json::to_value(sample_grow()).expect("serialize");
        engine
            .apply_grow_event(&key, SnapshotEvent::Snapshot(doc))
            .await;

        assert_eq!(engine.phase(&SyncTarget::Grow(key.clone())).await, LoadPhase::Loaded);
        assert_eq!(store.grow(&key).await.expect("grow").stage, GrowStage::Fruiting);
    }

    #[tokio::test]
    async fn test_subscription_error_is_terminal_until_new_begin() {
        let (_, _, engine) = harness();
        let key = DocKey::remote("g-1");
        let target = SyncTarget::Grow(key.clone());
        engine.begin(target.clone()).await;

        engine
            .apply_grow_event(&key, SnapshotEvent::Error(SyncError::Unavailable("gone".into())))
            .await;
        assert_eq!(engine.phase(&target).await, LoadPhase::Error);

        // A new subscription resets the phase.
        engine.begin(target.clone()).await;
        assert_eq!(engine.phase(&target).await, LoadPhase::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_environment_installs_and_persists_default() {
        let (remote, store, engine) = harness();
        engine.begin(SyncTarget::Environment).await;

        engine.apply_environment_event(SnapshotEvent::Missing).await;

        // Local default visible immediately, without waiting for the write.
        let record = store.environment().await.expect("record");
        assert_eq!(record, EnvironmentRecord::empty());
        assert_eq!(engine.phase(&SyncTarget::Environment).await, LoadPhase::Loaded);

        // Background persist lands in the remote store.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        let doc = remote.raw_document(ENVIRONMENTS, "user-1");
        assert!(doc.is_some(), "default record was not persisted");
    }

    #[tokio::test]
    async fn test_missing_environment_with_pending_mutation_is_ignored() {
        let (remote, store, engine) = harness();
        let now = chrono::Utc::now();
        let _token = store
            .apply_environment_update(crate::store::EnvironmentUpdate {
                temperature: Some(75.0),
                humidity: Some(85.0),
                notes: None,
                reading: None,
                last_update: now,
            })
            .await;

        engine.begin(SyncTarget::Environment).await;
        engine.apply_environment_event(SnapshotEvent::Missing).await;
        tokio::task::yield_now().await;

        // Optimistic state untouched, no default write issued.
        let record = store.environment().await.expect("record");
        assert_eq!(record.temperature, Some(75.0));
        assert!(remote.raw_document(ENVIRONMENTS, "user-1").is_none());

        // The optimistic record is renderable: the target must not be
        // parked in Loading.
        assert_eq!(engine.phase(&SyncTarget::Environment).await, LoadPhase::Loaded);
    }

    #[tokio::test]
    async fn test_missing_grow_with_pending_creation_reaches_loaded() {
        let (_, store, engine) = harness();
        let (key, _token) = store.apply_create_grow(sample_grow()).await;
        let target = SyncTarget::Grow(key.clone());
        engine.begin(target.clone()).await;

        engine.apply_grow_event(&key, SnapshotEvent::Missing).await;

        // Optimistic copy kept, phase moved on.
        assert!(store.grow(&key).await.is_some());
        assert_eq!(engine.phase(&target).await, LoadPhase::Loaded);
    }

    #[tokio::test]
    async fn test_malformed_snapshot_sets_error_phase() {
        let (_, _, engine) = harness();
        let key = DocKey::remote("g-1");
        engine
            .apply_grow_event(&key, SnapshotEvent::Snapshot(serde_json::json!({"species": 42})))
            .await;
        assert_eq!(
            engine.phase(&SyncTarget::Grow(key)).await,
            LoadPhase::Error
        );
    }
}
