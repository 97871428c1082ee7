//! Optimistic in-memory projection
//!
//! Grows are keyed by [`DocKey`] (temporary or server-assigned; both are
//! plain map keys, so resolving a temporary id is a re-key, not a pointer
//! swap). Every optimistic mutation records a pending entry with enough
//! information to either roll it back (fatal failure) or re-apply it on top
//! of a fresh remote snapshot (reconciliation).
//!
//! Read-your-own-write holds: the projection reflects a mutation the moment
//! `apply_*` returns, before any network call resolves.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::history;
use crate::keys::DocKey;
use crate::model::{EnvironmentRecord, Grow, GrowStage, Reading, StageEvent};

/// Stable token identifying one optimistic mutation until it is confirmed
/// or rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationToken(uuid::Uuid);

impl MutationToken {
    fn fresh() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

/// Optimistic progress update for one grow.
#[derive(Debug, Clone)]
pub struct GrowUpdate {
    pub stage: GrowStage,
    /// Replaces the grow's notes when present; `None` leaves them alone
    pub notes: Option<String>,
    /// History entry prepended alongside the field updates
    pub event: StageEvent,
}

/// Optimistic update for the environment record.
#[derive(Debug, Clone)]
pub struct EnvironmentUpdate {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub notes: Option<String>,
    /// Reading prepended to the bounded history, when the submission
    /// carried measurable values
    pub reading: Option<Reading>,
    pub last_update: DateTime<Utc>,
}

enum PendingKind {
    GrowCreate {
        key: DocKey,
    },
    GrowUpdate {
        key: DocKey,
        prior: Box<Grow>,
        update: GrowUpdate,
    },
    EnvironmentUpdate {
        prior: Option<EnvironmentRecord>,
        update: EnvironmentUpdate,
    },
}

struct PendingEntry {
    token: MutationToken,
    kind: PendingKind,
}

#[derive(Default)]
struct StoreState {
    grows: HashMap<DocKey, Grow>,
    environment: Option<EnvironmentRecord>,
    /// Unresolved optimistic mutations, in application order
    pending: Vec<PendingEntry>,
}

/// The projection the UI observes.
pub struct LocalStateStore {
    state: RwLock<StoreState>,
    revision: watch::Sender<u64>,
    environment_history_cap: usize,
}

impl LocalStateStore {
    pub fn new(environment_history_cap: usize) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(StoreState::default()),
            revision,
            environment_history_cap,
        }
    }

    /// Observers re-render whenever this receiver reports a change.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    // ---- reads ----

    pub async fn grow(&self, key: &DocKey) -> Option<Grow> {
        self.state.read().await.grows.get(key).cloned()
    }

    pub async fn grows(&self) -> Vec<(DocKey, Grow)> {
        self.state
            .read()
            .await
            .grows
            .iter()
            .map(|(k, g)| (k.clone(), g.clone()))
            .collect()
    }

    pub async fn environment(&self) -> Option<EnvironmentRecord> {
        self.state.read().await.environment.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.read().await.pending.len()
    }

    /// Whether an optimistic creation for `key` is still unresolved.
    pub async fn has_pending_create(&self, key: &DocKey) -> bool {
        self.state.read().await.pending.iter().any(|entry| {
            matches!(&entry.kind, PendingKind::GrowCreate { key: k } if k == key)
        })
    }

    /// Whether any optimistic environment mutation is still unresolved.
    pub async fn has_pending_environment(&self) -> bool {
        self.state
            .read()
            .await
            .pending
            .iter()
            .any(|entry| matches!(entry.kind, PendingKind::EnvironmentUpdate { .. }))
    }

    // ---- optimistic mutations ----

    /// Insert a new grow under a fresh temporary key.
    pub async fn apply_create_grow(&self, grow: Grow) -> (DocKey, MutationToken) {
        let key = DocKey::fresh_local();
        let token = MutationToken::fresh();
        {
            let mut state = self.state.write().await;
            state.grows.insert(key.clone(), grow);
            state.pending.push(PendingEntry {
                token,
                kind: PendingKind::GrowCreate { key: key.clone() },
            });
        }
        debug!(key = %key, "optimistic grow creation applied");
        self.bump();
        (key, token)
    }

    /// Apply a progress update to an existing grow.
    pub async fn apply_grow_update(
        &self,
        key: &DocKey,
        update: GrowUpdate,
    ) -> Result<MutationToken> {
        let token = MutationToken::fresh();
        {
            let mut state = self.state.write().await;
            let grow = state
                .grows
                .get_mut(key)
                .ok_or_else(|| SyncError::NotFound(format!("no grow under key {}", key)))?;
            let prior = Box::new(grow.clone());
            apply_grow_update(grow, &update);
            state.pending.push(PendingEntry {
                token,
                kind: PendingKind::GrowUpdate {
                    key: key.clone(),
                    prior,
                    update,
                },
            });
        }
        debug!(key = %key, "optimistic grow update applied");
        self.bump();
        Ok(token)
    }

    /// Apply a reading submission to the environment record, creating the
    /// local record if this is the first write.
    pub async fn apply_environment_update(&self, update: EnvironmentUpdate) -> MutationToken {
        let token = MutationToken::fresh();
        {
            let mut state = self.state.write().await;
            let prior = state.environment.clone();
            let record = state
                .environment
                .get_or_insert_with(EnvironmentRecord::empty);
            apply_environment_update(record, &update, self.environment_history_cap);
            state.pending.push(PendingEntry {
                token,
                kind: PendingKind::EnvironmentUpdate { prior, update },
            });
        }
        debug!("optimistic environment update applied");
        self.bump();
        token
    }

    /// Swap a temporary key for the server-assigned id, preserving every
    /// field already applied. Pending entries referencing the temporary key
    /// follow it.
    pub async fn resolve_temporary(&self, temp: &DocKey, server_id: &str) -> Option<DocKey> {
        let resolved = DocKey::remote(server_id);
        {
            let mut state = self.state.write().await;
            let grow = state.grows.remove(temp)?;
            state.grows.insert(resolved.clone(), grow);
            for entry in &mut state.pending {
                match &mut entry.kind {
                    PendingKind::GrowCreate { key } if key == temp => *key = resolved.clone(),
                    PendingKind::GrowUpdate { key, .. } if key == temp => *key = resolved.clone(),
                    _ => {}
                }
            }
        }
        debug!(temp = %temp, id = server_id, "temporary id resolved");
        self.bump();
        Some(resolved)
    }

    /// Drop the pending record for a confirmed mutation.
    pub async fn confirm(&self, token: MutationToken) {
        let mut state = self.state.write().await;
        state.pending.retain(|entry| entry.token != token);
    }

    /// Undo a failed optimistic mutation: creations are removed entirely,
    /// updates restore the prior value.
    pub async fn rollback(&self, token: MutationToken) {
        {
            let mut state = self.state.write().await;
            let position = state.pending.iter().position(|e| e.token == token);
            let Some(position) = position else {
                warn!("rollback for unknown mutation token, ignoring");
                return;
            };
            let entry = state.pending.remove(position);
            match entry.kind {
                PendingKind::GrowCreate { key } => {
                    state.grows.remove(&key);
                    debug!(key = %key, "rolled back optimistic creation");
                }
                PendingKind::GrowUpdate { key, prior, .. } => {
                    state.grows.insert(key.clone(), *prior);
                    debug!(key = %key, "rolled back optimistic update");
                }
                PendingKind::EnvironmentUpdate { prior, .. } => {
                    state.environment = prior;
                    debug!("rolled back optimistic environment update");
                }
            }
        }
        self.bump();
    }

    // ---- reconciliation entry points ----

    /// Replace a grow wholesale with a remote snapshot, then re-apply any
    /// unresolved optimistic updates for that key on top. Skipped while an
    /// optimistic creation for the key is still in flight (the local copy
    /// is all we have).
    pub async fn replace_grow_from_remote(&self, key: &DocKey, remote: Grow) {
        {
            let mut state = self.state.write().await;
            let create_pending = state.pending.iter().any(|entry| {
                matches!(&entry.kind, PendingKind::GrowCreate { key: k } if k == key)
            });
            if create_pending {
                debug!(key = %key, "snapshot ignored, creation still pending");
                return;
            }
            let mut grow = remote;
            for entry in &state.pending {
                if let PendingKind::GrowUpdate { key: k, update, .. } = &entry.kind {
                    if k == key {
                        apply_grow_update(&mut grow, update);
                    }
                }
            }
            state.grows.insert(key.clone(), grow);
        }
        self.bump();
    }

    /// Remove a grow the remote store no longer has.
    pub async fn remove_grow(&self, key: &DocKey) {
        let removed = self.state.write().await.grows.remove(key).is_some();
        if removed {
            self.bump();
        }
    }

    /// Replace the environment record with a remote snapshot, re-applying
    /// unresolved optimistic updates on top. Remote history is
    /// authoritative; confirmed local prepends are assumed represented in
    /// the snapshot and dropped in its favor.
    pub async fn replace_environment_from_remote(&self, remote: EnvironmentRecord) {
        {
            let mut state = self.state.write().await;
            let mut record = remote;
            for entry in &state.pending {
                if let PendingKind::EnvironmentUpdate { update, .. } = &entry.kind {
                    apply_environment_update(&mut record, update, self.environment_history_cap);
                }
            }
            state.environment = Some(record);
        }
        self.bump();
    }

    /// Install the default record when the remote document is missing.
    /// No-op if a local record already exists.
    pub async fn install_default_environment(&self) -> bool {
        let installed = {
            let mut state = self.state.write().await;
            if state.environment.is_some() {
                false
            } else {
                state.environment = Some(EnvironmentRecord::empty());
                true
            }
        };
        if installed {
            debug!("default environment record installed");
            self.bump();
        }
        installed
    }
}

fn apply_grow_update(grow: &mut Grow, update: &GrowUpdate) {
    grow.stage = update.stage;
    if let Some(notes) = &update.notes {
        grow.notes = notes.clone();
    }
    grow.history = history::prepend(update.event.clone(), &grow.history, None);
    grow.updated_at = Some(update.event.timestamp);
}

fn apply_environment_update(record: &mut EnvironmentRecord, update: &EnvironmentUpdate, cap: usize) {
    if update.temperature.is_some() {
        record.temperature = update.temperature;
    }
    if update.humidity.is_some() {
        record.humidity = update.humidity;
    }
    if let Some(notes) = &update.notes {
        record.notes = notes.clone();
    }
    if let Some(reading) = &update.reading {
        record.history = history::prepend(reading.clone(), &record.history, Some(cap));
    }
    record.last_update = Some(update.last_update);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserId;
    use chrono::NaiveDate;

    fn sample_grow() -> Grow {
        Grow {
            owner_id: UserId::new("user-1"),
            species: "Golden Teacher".into(),
            stage: GrowStage::Inoculation,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 15).expect("date"),
            notes: String::new(),
            history: vec![],
            created_at: None,
            updated_at: None,
        }
    }

    fn stage_event(stage: GrowStage) -> StageEvent {
        StageEvent {
            timestamp: Utc::now(),
            stage,
            notes: String::new(),
            temperature: None,
            humidity: None,
        }
    }

    fn reading_update(temperature: f64, humidity: f64) -> EnvironmentUpdate {
        let now = Utc::now();
        EnvironmentUpdate {
            temperature: Some(temperature),
            humidity: Some(humidity),
            notes: Some(String::new()),
            reading: Some(Reading {
                timestamp: now,
                temperature,
                humidity,
                notes: String::new(),
            }),
            last_update: now,
        }
    }

    #[tokio::test]
    async fn test_create_then_resolve_rekeys_once() {
        let store = LocalStateStore::new(100);
        let (temp, _token) = store.apply_create_grow(sample_grow()).await;

        assert!(temp.is_local());
        assert_eq!(store.grows().await.len(), 1);
        assert!(store.grow(&temp).await.is_some());

        let resolved = store
            .resolve_temporary(&temp, "server-1")
            .await
            .expect("resolve");
        assert_eq!(resolved, DocKey::remote("server-1"));

        // Exactly one grow, under the new key, none under the old.
        let grows = store.grows().await;
        assert_eq!(grows.len(), 1);
        assert!(store.grow(&temp).await.is_none());
        assert_eq!(
            store.grow(&resolved).await.expect("grow").species,
            "Golden Teacher"
        );
    }

    #[tokio::test]
    async fn test_rollback_removes_failed_creation() {
        let store = LocalStateStore::new(100);
        let (key, token) = store.apply_create_grow(sample_grow()).await;

        store.rollback(token).await;
        assert!(store.grow(&key).await.is_none());
        assert_eq!(store.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_rollback_restores_prior_update_state() {
        let store = LocalStateStore::new(100);
        let (key, create_token) = store.apply_create_grow(sample_grow()).await;
        store.confirm(create_token).await;

        let token = store
            .apply_grow_update(
                &key,
                GrowUpdate {
                    stage: GrowStage::Pinning,
                    notes: Some("pins forming".into()),
                    event: stage_event(GrowStage::Pinning),
                },
            )
            .await
            .expect("update");

        // Read-your-own-write before rollback.
        let grow = store.grow(&key).await.expect("grow");
        assert_eq!(grow.stage, GrowStage::Pinning);
        assert_eq!(grow.history.len(), 1);

        store.rollback(token).await;
        let grow = store.grow(&key).await.expect("grow");
        assert_eq!(grow.stage, GrowStage::Inoculation);
        assert!(grow.history.is_empty());
        assert_eq!(grow.notes, "");
    }

    #[tokio::test]
    async fn test_update_unknown_key_is_not_found() {
        let store = LocalStateStore::new(100);
        let err = store
            .apply_grow_update(
                &DocKey::remote("ghost"),
                GrowUpdate {
                    stage: GrowStage::Fruiting,
                    notes: None,
                    event: stage_event(GrowStage::Fruiting),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_environment_update_creates_record_and_caps_history() {
        let store = LocalStateStore::new(3);
        for n in 0..5 {
            let token = store
                .apply_environment_update(reading_update(70.0 + n as f64, 85.0))
                .await;
            store.confirm(token).await;
        }

        let record = store.environment().await.expect("record");
        assert_eq!(record.history.len(), 3);
        assert_eq!(record.temperature, Some(74.0));
        // Newest first.
        assert_eq!(record.history[0].temperature, 74.0);
    }

    #[tokio::test]
    async fn test_environment_rollback_restores_prior_record() {
        let store = LocalStateStore::new(100);
        let first = store.apply_environment_update(reading_update(70.0, 85.0)).await;
        store.confirm(first).await;

        let second = store.apply_environment_update(reading_update(99.0, 10.0)).await;
        store.rollback(second).await;

        let record = store.environment().await.expect("record");
        assert_eq!(record.temperature, Some(70.0));
        assert_eq!(record.history.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_replaces_wholesale_but_keeps_pending() {
        let store = LocalStateStore::new(100);
        let (key, create_token) = store.apply_create_grow(sample_grow()).await;
        store.confirm(create_token).await;
        let key = store
            .resolve_temporary(&key, "server-1")
            .await
            .expect("resolve");

        // One confirmed update (represented in the snapshot) and one still
        // in flight.
        let confirmed = store
            .apply_grow_update(
                &key,
                GrowUpdate {
                    stage: GrowStage::Colonization,
                    notes: None,
                    event: stage_event(GrowStage::Colonization),
                },
            )
            .await
            .expect("update");
        store.confirm(confirmed).await;

        let _in_flight = store
            .apply_grow_update(
                &key,
                GrowUpdate {
                    stage: GrowStage::Pinning,
                    notes: Some("pinning".into()),
                    event: stage_event(GrowStage::Pinning),
                },
            )
            .await
            .expect("update");

        // Remote snapshot knows about the colonization update only.
        let mut remote = sample_grow();
        remote.stage = GrowStage::Colonization;
        remote.history = vec![stage_event(GrowStage::Colonization)];
        store.replace_grow_from_remote(&key, remote).await;

        let grow = store.grow(&key).await.expect("grow");
        // In-flight update re-applied on top of the authoritative snapshot.
        assert_eq!(grow.stage, GrowStage::Pinning);
        assert_eq!(grow.notes, "pinning");
        assert_eq!(grow.history.len(), 2);
        assert_eq!(grow.history[0].stage, GrowStage::Pinning);
    }

    #[tokio::test]
    async fn test_snapshot_ignored_while_creation_pending() {
        let store = LocalStateStore::new(100);
        let (key, _token) = store.apply_create_grow(sample_grow()).await;

        let mut remote = sample_grow();
        remote.species = "Impostor".into();
        store.replace_grow_from_remote(&key, remote).await;

        assert_eq!(store.grow(&key).await.expect("grow").species, "Golden Teacher");
    }

    #[tokio::test]
    async fn test_revision_bumps_on_mutation() {
        let store = LocalStateStore::new(100);
        let watch = store.watch_revision();
        let before = *watch.borrow();

        let (_, token) = store.apply_create_grow(sample_grow()).await;
        assert!(*store.watch_revision().borrow() > before);

        store.rollback(token).await;
        assert!(*store.watch_revision().borrow() > before + 1);
    }

    #[tokio::test]
    async fn test_install_default_environment_once() {
        let store = LocalStateStore::new(100);
        assert!(store.install_default_environment().await);
        assert!(!store.install_default_environment().await);

        let record = store.environment().await.expect("record");
        assert_eq!(record, EnvironmentRecord::empty());
    }
}
