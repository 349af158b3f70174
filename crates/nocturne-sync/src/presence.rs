use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nocturne_store::{DocumentStore, Query};
use nocturne_types::{Effect, UserRecord};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::paths;
use crate::records::decode;

/// Keeps this session's liveness signal fresh and derives "online" for
/// everyone else from recency of theirs.
///
/// Presence is approximate by design: a failed heartbeat is dropped and the
/// next tick retries, the teardown write is best-effort, and readers gate on
/// `lastActive` recency rather than the `online` flag alone.
pub struct PresenceTracker {
    store: Arc<dyn DocumentStore>,
    user_id: String,
    heartbeat_interval: Duration,
    stale_after: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn DocumentStore>, user_id: impl Into<String>, config: &SyncConfig) -> Self {
        PresenceTracker {
            store,
            user_id: user_id.into(),
            heartbeat_interval: config.heartbeat_interval,
            stale_after: config.presence_stale_after,
            task: Mutex::new(None),
        }
    }

    /// One heartbeat write. Factored out so tests drive beats without timers.
    pub async fn beat(store: &dyn DocumentStore, user_id: &str) -> Result<()> {
        store
            .update(
                paths::USERS,
                user_id,
                json!({ "lastActive": Utc::now().timestamp_millis(), "online": true }),
            )
            .await?;
        Ok(())
    }

    /// Begin the heartbeat loop. The first beat runs immediately; repeated
    /// calls while running are no-ops.
    pub fn start(&self) {
        let mut task = self.task.lock().expect("presence task lock poisoned");
        if task.is_some() {
            return;
        }
        let store = self.store.clone();
        let user_id = self.user_id.clone();
        let period = self.heartbeat_interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = Self::beat(store.as_ref(), &user_id).await {
                    // Dropped beat; the next tick retries.
                    warn!("heartbeat write failed for {}: {}", user_id, e);
                }
            }
        }));
    }

    /// Cancel the loop and make one best-effort offline write. The write may
    /// be dropped — readers tolerate that via the staleness threshold.
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().expect("presence task lock poisoned").take() {
            task.abort();
        }
        if let Err(e) = self
            .store
            .update(
                paths::USERS,
                &self.user_id,
                json!({ "online": false, "lastActive": Utc::now().timestamp_millis() }),
            )
            .await
        {
            debug!("teardown presence write dropped for {}: {}", self.user_id, e);
        }
    }

    /// `now - lastActive < stale_after`. No `lastActive` means offline.
    pub fn is_online(user: &UserRecord, now: DateTime<Utc>, stale_after: Duration) -> bool {
        let threshold = chrono::Duration::from_std(stale_after).unwrap_or(chrono::Duration::zero());
        user.last_active
            .map(|last| now.signed_duration_since(last) < threshold)
            .unwrap_or(false)
    }

    /// Live feed of user-record changes, for keeping a visible roster fresh
    /// without polling.
    pub fn watch(&self) -> tokio::sync::broadcast::Receiver<nocturne_store::StoreEvent> {
        self.store.watch(paths::USERS)
    }

    /// Everyone currently online: flagged online, recently active, not
    /// invisible, and carrying a usable display name.
    pub async fn online_roster(&self) -> Result<Vec<UserRecord>> {
        let now = Utc::now();
        let docs = self
            .store
            .query(Query::collection(paths::USERS).filter_eq("online", json!(true)))
            .await?;

        let mut roster = Vec::new();
        for doc in docs {
            let user: UserRecord = match decode(paths::USERS, doc) {
                Ok(user) => user,
                Err(e) => {
                    warn!("skipping corrupt user record in roster: {}", e);
                    continue;
                }
            };
            if !Self::is_online(&user, now, self.stale_after) {
                continue;
            }
            if user.effect_active(Effect::Invisible, now) {
                continue;
            }
            if user.display_name.trim().is_empty() {
                continue;
            }
            roster.push(user);
        }
        Ok(roster)
    }
}
