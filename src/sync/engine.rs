//! Sync engine - the API the screens call
//!
//! Every user action follows the same shape: validate locally, apply to the
//! projection optimistically, push the write through the retry scheduler,
//! then confirm, keep-local (offline), or roll back (fatal) depending on
//! how the write ended.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::keys::DocKey;
use crate::model::{Grow, GrowDraft, GrowStage, Reading, ReadingInput, StageEvent};
use crate::remote::{
    DocumentStore, EnvironmentPatch, GrowPatch, RemoteSyncClient, SubscriptionHandle,
};
use crate::retry::RetryPolicy;
use crate::session::Session;
use crate::store::{EnvironmentUpdate, GrowUpdate, LocalStateStore, MutationToken};
use crate::sync::reconcile::{ReconciliationEngine, SyncTarget};

/// How a save ended from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Confirmed by the remote store
    Synced,
    /// Network retries exhausted; the change is kept locally and will sync
    /// on a later write
    SavedLocally,
}

impl SaveOutcome {
    /// Message shown to the user for the offline case.
    pub fn user_message(&self) -> &'static str {
        match self {
            SaveOutcome::Synced => "Saved",
            SaveOutcome::SavedLocally => {
                "Changes saved locally and will sync when you're back online"
            }
        }
    }
}

/// User input for a grow progress update.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: GrowStage,
    pub notes: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// Client-side optimistic synchronization engine for one session.
pub struct SyncEngine {
    session: Session,
    store: Arc<LocalStateStore>,
    client: Arc<RemoteSyncClient>,
    retry: RetryPolicy,
    reconciler: Arc<ReconciliationEngine>,
    /// Cancellation handles for open subscriptions, per target
    watches: Mutex<HashMap<SyncTarget, SubscriptionHandle>>,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn DocumentStore>, session: Session, config: SyncConfig) -> Self {
        let store = Arc::new(LocalStateStore::new(config.environment_history_cap));
        let client = Arc::new(RemoteSyncClient::new(remote, session.clone()));
        let retry = config.retry.policy();
        let reconciler = Arc::new(ReconciliationEngine::new(
            Arc::clone(&store),
            Arc::clone(&client),
            retry.clone(),
        ));
        Self {
            session,
            store,
            client,
            retry,
            reconciler,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// The projection screens read and observe.
    pub fn store(&self) -> &Arc<LocalStateStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &Arc<ReconciliationEngine> {
        &self.reconciler
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether results for `target` may still be applied to the projection.
    /// False once the owning subscription has been torn down.
    async fn target_active(&self, target: &SyncTarget) -> bool {
        match self.watches.lock().await.get(target) {
            Some(handle) => handle.is_active(),
            None => true,
        }
    }

    // ---- grows ----

    /// Create a grow: optimistic insert under a temporary id, then a
    /// retried remote create that swaps in the server id.
    pub async fn create_grow(&self, draft: GrowDraft) -> Result<(DocKey, SaveOutcome)> {
        let now = Utc::now();
        draft.validate(now.date_naive())?;

        let notes = draft.notes.trim().to_string();
        let grow = Grow {
            owner_id: self.session.user_id().clone(),
            species: draft.species.trim().to_string(),
            stage: draft.stage,
            start_date: draft.start_date,
            notes: notes.clone(),
            // Seeded with one event for the starting stage
            history: vec![StageEvent {
                timestamp: now,
                stage: draft.stage,
                notes,
                temperature: None,
                humidity: None,
            }],
            created_at: Some(now),
            updated_at: Some(now),
        };

        let (temp, token) = self.store.apply_create_grow(grow.clone()).await;
        info!(key = %temp, species = %grow.species, "grow created optimistically");

        let created = self
            .retry
            .run(|| {
                let client = Arc::clone(&self.client);
                let grow = grow.clone();
                async move { client.create_grow(&grow).await }
            })
            .await;

        match created {
            Ok(server_id) => {
                if !self.target_active(&SyncTarget::Grow(temp.clone())).await {
                    debug!(key = %temp, "create result discarded, watch torn down");
                    return Ok((temp, SaveOutcome::Synced));
                }
                let key = self
                    .store
                    .resolve_temporary(&temp, &server_id)
                    .await
                    .unwrap_or_else(|| DocKey::remote(&server_id));
                self.store.confirm(token).await;
                info!(key = %key, "grow creation confirmed");
                Ok((key, SaveOutcome::Synced))
            }
            Err(err) if err.is_retryable() => {
                // Availability over consistency: keep the optimistic state.
                warn!(key = %temp, error = %err, "grow creation offline, kept locally");
                Ok((temp, SaveOutcome::SavedLocally))
            }
            Err(err) => {
                self.store.rollback(token).await;
                warn!(key = %temp, error = %err, "grow creation rolled back");
                Err(err)
            }
        }
    }

    /// Record progress on a grow: stage change, optional notes, optional
    /// readings. One history entry is appended alongside the field updates.
    pub async fn update_grow_progress(
        &self,
        key: &DocKey,
        update: ProgressUpdate,
    ) -> Result<SaveOutcome> {
        if let Some(t) = update.temperature {
            crate::model::validate_temperature(t)?;
        }
        if let Some(h) = update.humidity {
            crate::model::validate_humidity(h)?;
        }

        let now = Utc::now();
        let notes = update.notes.trim().to_string();
        let event = StageEvent {
            timestamp: now,
            stage: update.stage,
            notes: notes.clone(),
            temperature: update.temperature,
            humidity: update.humidity,
        };
        let grow_update = GrowUpdate {
            stage: update.stage,
            notes: (!notes.is_empty()).then_some(notes.clone()),
            event: event.clone(),
        };

        let token = self.store.apply_grow_update(key, grow_update).await?;

        // A grow whose creation is still unconfirmed has no server document
        // to write to; the update stays local until a later sync.
        let Some(id) = key.remote_id().map(str::to_string) else {
            debug!(key = %key, "update kept locally, grow not yet confirmed");
            return Ok(SaveOutcome::SavedLocally);
        };

        let patch = GrowPatch {
            stage: update.stage,
            notes: (!notes.is_empty()).then_some(notes),
            updated_at: now,
        };

        let merged = self
            .retry
            .run(|| {
                let client = Arc::clone(&self.client);
                let id = id.clone();
                let patch = patch.clone();
                async move { client.merge_grow(&id, &patch).await }
            })
            .await;
        match merged {
            Ok(()) => {}
            Err(err) => return self.settle_failure(key, token, err).await,
        }

        let appended = self
            .retry
            .run(|| {
                let client = Arc::clone(&self.client);
                let id = id.clone();
                let event = event.clone();
                async move { client.append_stage_event(&id, &event).await }
            })
            .await;
        match appended {
            Ok(()) => {
                if self.target_active(&SyncTarget::Grow(key.clone())).await {
                    self.store.confirm(token).await;
                } else {
                    debug!(key = %key, "update result discarded, watch torn down");
                }
                Ok(SaveOutcome::Synced)
            }
            Err(err) => self.settle_failure(key, token, err).await,
        }
    }

    /// Shared failure handling for grow writes: offline keeps the local
    /// state, fatal rolls it back.
    async fn settle_failure(
        &self,
        key: &DocKey,
        token: MutationToken,
        err: SyncError,
    ) -> Result<SaveOutcome> {
        if !self.target_active(&SyncTarget::Grow(key.clone())).await {
            debug!(key = %key, "failure result discarded, watch torn down");
            return Err(err);
        }
        if err.is_retryable() {
            warn!(key = %key, error = %err, "grow update offline, kept locally");
            Ok(SaveOutcome::SavedLocally)
        } else {
            self.store.rollback(token).await;
            warn!(key = %key, error = %err, "grow update rolled back");
            Err(err)
        }
    }

    // ---- environment ----

    /// Submit an ambient reading. Values are merged into the current
    /// conditions; when a measurable value is present a history entry is
    /// appended as well.
    pub async fn submit_reading(&self, input: ReadingInput) -> Result<SaveOutcome> {
        input.validate()?;

        let now = Utc::now();
        let reading = input.has_reading().then(|| Reading {
            timestamp: now,
            // Absent halves default to zero, matching the stored shape.
            temperature: input.temperature.unwrap_or(0.0),
            humidity: input.humidity.unwrap_or(0.0),
            notes: input.notes.clone(),
        });

        let token = self
            .store
            .apply_environment_update(EnvironmentUpdate {
                temperature: input.temperature,
                humidity: input.humidity,
                notes: Some(input.notes.clone()),
                reading: reading.clone(),
                last_update: now,
            })
            .await;

        let patch = EnvironmentPatch {
            temperature: input.temperature,
            humidity: input.humidity,
            notes: Some(input.notes),
            last_update: now,
        };

        // Merge first so the document exists before the history append.
        let merged = self
            .retry
            .run(|| {
                let client = Arc::clone(&self.client);
                let patch = patch.clone();
                async move { client.merge_environment(&patch).await }
            })
            .await;
        match merged {
            Ok(()) => {}
            Err(err) => return self.settle_environment_failure(token, err).await,
        }

        if let Some(reading) = reading {
            let appended = self
                .retry
                .run(|| {
                    let client = Arc::clone(&self.client);
                    let reading = reading.clone();
                    async move { client.append_reading(&reading).await }
                })
                .await;
            if let Err(err) = appended {
                return self.settle_environment_failure(token, err).await;
            }
        }

        if self.target_active(&SyncTarget::Environment).await {
            self.store.confirm(token).await;
        } else {
            debug!("reading result discarded, watch torn down");
        }
        Ok(SaveOutcome::Synced)
    }

    async fn settle_environment_failure(
        &self,
        token: MutationToken,
        err: SyncError,
    ) -> Result<SaveOutcome> {
        if !self.target_active(&SyncTarget::Environment).await {
            debug!("failure result discarded, watch torn down");
            return Err(err);
        }
        if err.is_retryable() {
            warn!(error = %err, "reading offline, kept locally");
            Ok(SaveOutcome::SavedLocally)
        } else {
            self.store.rollback(token).await;
            warn!(error = %err, "reading rolled back");
            Err(err)
        }
    }

    // ---- subscriptions ----

    /// Watch a confirmed grow: open the push channel and pump every event
    /// through the reconciliation engine until unsubscribed.
    pub async fn watch_grow(&self, key: &DocKey) -> Result<SubscriptionHandle> {
        let id = key
            .remote_id()
            .ok_or_else(|| SyncError::NotFound("grow has no server id yet".into()))?;

        let target = SyncTarget::Grow(key.clone());
        self.reconciler.begin(target.clone()).await;

        let mut sub = self.client.subscribe_grow(id).await;
        let handle = sub.handle();
        self.watches
            .lock()
            .await
            .insert(target, handle.clone());

        let reconciler = Arc::clone(&self.reconciler);
        let key = key.clone();
        tokio::spawn(async move {
            while let Some(event) = sub.next_event().await {
                reconciler.apply_grow_event(&key, event).await;
            }
            debug!(key = %key, "grow watch ended");
        });
        Ok(handle)
    }

    /// Watch the session's environment record.
    pub async fn watch_environment(&self) -> SubscriptionHandle {
        self.reconciler.begin(SyncTarget::Environment).await;

        let mut sub = self.client.subscribe_environment().await;
        let handle = sub.handle();
        self.watches
            .lock()
            .await
            .insert(SyncTarget::Environment, handle.clone());

        let reconciler = Arc::clone(&self.reconciler);
        tokio::spawn(async move {
            while let Some(event) = sub.next_event().await {
                reconciler.apply_environment_event(event).await;
            }
            debug!("environment watch ended");
        });
        handle
    }
}
