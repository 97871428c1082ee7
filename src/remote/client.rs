//! Typed remote client
//!
//! Binds a [`DocumentStore`] to a session: serializes the domain types,
//! maps missing documents to [`SyncError::NotFound`], and enforces grow
//! ownership the way the backing service does (a grow owned by someone else
//! reads as permission denied, not as data).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::model::{EnvironmentRecord, Grow, GrowStage, Reading, StageEvent};
use crate::remote::{DocumentStore, Subscription, ENVIRONMENTS, GROWS};
use crate::session::Session;

/// Partial grow update; unnamed fields stay untouched server-side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowPatch {
    pub stage: GrowStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Partial environment update. Never names `history`; readings travel
/// through `append_history` instead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub last_update: DateTime<Utc>,
}

/// Typed facade over the document store for one session.
pub struct RemoteSyncClient {
    store: Arc<dyn DocumentStore>,
    session: Session,
}

impl RemoteSyncClient {
    pub fn new(store: Arc<dyn DocumentStore>, session: Session) -> Self {
        Self { store, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn to_value<T: Serialize>(value: &T) -> Result<Value> {
        serde_json::to_value(value)
            .map_err(|e| SyncError::Internal(format!("serialization failed: {}", e)))
    }

    fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
        serde_json::from_value(value)
            .map_err(|e| SyncError::Internal(format!("malformed remote document: {}", e)))
    }

    fn check_ownership(&self, grow: &Grow) -> Result<()> {
        if grow.owner_id != *self.session.user_id() {
            return Err(SyncError::PermissionDenied(
                "Not authorized to access this grow".into(),
            ));
        }
        Ok(())
    }

    // ---- grows ----

    pub async fn fetch_grow(&self, id: &str) -> Result<Grow> {
        let doc = self
            .store
            .fetch(GROWS, id)
            .await?
            .ok_or_else(|| SyncError::NotFound("Grow not found".into()))?;
        let grow: Grow = Self::from_value(doc)?;
        self.check_ownership(&grow)?;
        Ok(grow)
    }

    pub async fn create_grow(&self, grow: &Grow) -> Result<String> {
        let id = self.store.create(GROWS, Self::to_value(grow)?).await?;
        debug!(id = %id, "grow created remotely");
        Ok(id)
    }

    pub async fn merge_grow(&self, id: &str, patch: &GrowPatch) -> Result<()> {
        self.store.merge(GROWS, id, Self::to_value(patch)?).await
    }

    pub async fn append_stage_event(&self, id: &str, event: &StageEvent) -> Result<()> {
        self.store
            .append_history(GROWS, id, Self::to_value(event)?)
            .await
    }

    pub async fn subscribe_grow(&self, id: &str) -> Subscription {
        self.store.subscribe(GROWS, id).await
    }

    /// Decode a pushed grow snapshot, applying the same ownership check as
    /// a direct fetch.
    pub fn decode_grow(&self, doc: Value) -> Result<Grow> {
        let grow: Grow = Self::from_value(doc)?;
        self.check_ownership(&grow)?;
        Ok(grow)
    }

    // ---- environment ----

    fn owner_key(&self) -> &str {
        self.session.user_id().as_str()
    }

    pub async fn fetch_environment(&self) -> Result<Option<EnvironmentRecord>> {
        match self.store.fetch(ENVIRONMENTS, self.owner_key()).await? {
            Some(doc) => Ok(Some(Self::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Persist a full environment record under the owner key. Merge-based,
    /// so this doubles as the upsert for the default record.
    pub async fn put_environment(&self, record: &EnvironmentRecord) -> Result<()> {
        self.store
            .merge(ENVIRONMENTS, self.owner_key(), Self::to_value(record)?)
            .await
    }

    pub async fn merge_environment(&self, patch: &EnvironmentPatch) -> Result<()> {
        self.store
            .merge(ENVIRONMENTS, self.owner_key(), Self::to_value(patch)?)
            .await
    }

    pub async fn append_reading(&self, reading: &Reading) -> Result<()> {
        self.store
            .append_history(ENVIRONMENTS, self.owner_key(), Self::to_value(reading)?)
            .await
    }

    pub async fn subscribe_environment(&self) -> Subscription {
        self.store.subscribe(ENVIRONMENTS, self.owner_key()).await
    }

    pub fn decode_environment(&self, doc: Value) -> Result<EnvironmentRecord> {
        Self::from_value(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GrowDraft;
    use crate::remote::InMemoryStore;
    use crate::session::UserId;
    use chrono::NaiveDate;

    fn session(user: &str) -> Session {
        Session::new(UserId::new(user))
    }

    fn sample_grow(owner: &str) -> Grow {
        let draft = GrowDraft {
            species: "Golden Teacher".into(),
            stage: GrowStage::Inoculation,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 15).expect("date"),
            notes: String::new(),
        };
        Grow {
            owner_id: UserId::new(owner),
            species: draft.species,
            stage: draft.stage,
            start_date: draft.start_date,
            notes: draft.notes,
            history: vec![],
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_grow_round_trip() {
        let store = Arc::new(InMemoryStore::new());
        let client = RemoteSyncClient::new(store, session("user-1"));

        let id = client.create_grow(&sample_grow("user-1")).await.expect("create");
        let grow = client.fetch_grow(&id).await.expect("fetch");
        assert_eq!(grow.species, "Golden Teacher");
        assert_eq!(grow.stage, GrowStage::Inoculation);
    }

    #[tokio::test]
    async fn test_fetch_missing_grow_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let client = RemoteSyncClient::new(store, session("user-1"));
        let err = client.fetch_grow("nope").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ownership_mismatch_is_permission_denied() {
        let store = Arc::new(InMemoryStore::new());
        let owner = RemoteSyncClient::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            session("user-1"),
        );
        let id = owner.create_grow(&sample_grow("user-1")).await.expect("create");

        let intruder = RemoteSyncClient::new(store, session("user-2"));
        let err = intruder.fetch_grow(&id).await.unwrap_err();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_environment_patch_leaves_history_untouched() {
        let store = Arc::new(InMemoryStore::new());
        let client = RemoteSyncClient::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            session("user-1"),
        );

        let mut record = EnvironmentRecord::empty();
        record.history = vec![Reading {
            timestamp: Utc::now(),
            temperature: 70.0,
            humidity: 90.0,
            notes: String::new(),
        }];
        client.put_environment(&record).await.expect("put");

        client
            .merge_environment(&EnvironmentPatch {
                temperature: Some(75.0),
                humidity: None,
                notes: None,
                last_update: Utc::now(),
            })
            .await
            .expect("merge");

        let fetched = client
            .fetch_environment()
            .await
            .expect("fetch")
            .expect("record");
        assert_eq!(fetched.temperature, Some(75.0));
        assert_eq!(fetched.history.len(), 1);
    }
}
