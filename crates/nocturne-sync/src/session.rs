use std::sync::Arc;

use chrono::Utc;
use nocturne_store::DocumentStore;
use nocturne_types::{SyncEvent, UserRecord};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::effects::EffectStore;
use crate::error::Result;
use crate::fanout::FanoutEngine;
use crate::follows::{FollowerRegistry, ScanRegistry};
use crate::history::ChatHistory;
use crate::notifications::NotificationFeed;
use crate::poller::WatermarkPoller;
use crate::presence::PresenceTracker;
use crate::records::load_user;
use crate::topics::TopicService;

/// One signed-in user's synchronization session.
///
/// Explicitly constructed, owns every service, and carries the lifecycle:
/// `start` brings up the heartbeat and the poller, `set_visible` follows the
/// tab, `stop` tears both down. Nothing here is global — two sessions over
/// the same store are completely independent, which is also what makes the
/// timing-sensitive pieces testable.
pub struct Session {
    user_id: String,
    store: Arc<dyn DocumentStore>,

    pub effects: EffectStore,
    pub presence: PresenceTracker,
    pub history: ChatHistory,
    pub registry: Arc<dyn FollowerRegistry>,
    pub fanout: Arc<FanoutEngine>,
    pub notifications: NotificationFeed,
    pub topics: TopicService,
    pub poller: WatermarkPoller,
}

impl Session {
    /// Session with the default (scan) follower registry.
    pub fn new(store: Arc<dyn DocumentStore>, user_id: impl Into<String>, config: SyncConfig) -> Self {
        let registry: Arc<dyn FollowerRegistry> = Arc::new(ScanRegistry::new(store.clone()));
        Self::with_registry(store, user_id, registry, config)
    }

    /// Session with a caller-chosen registry strategy.
    pub fn with_registry(
        store: Arc<dyn DocumentStore>,
        user_id: impl Into<String>,
        registry: Arc<dyn FollowerRegistry>,
        config: SyncConfig,
    ) -> Self {
        let user_id = user_id.into();
        let fanout = Arc::new(FanoutEngine::new(store.clone(), registry.clone()));
        Session {
            effects: EffectStore::new(store.clone()),
            presence: PresenceTracker::new(store.clone(), user_id.clone(), &config),
            history: ChatHistory::new(store.clone(), &config),
            notifications: NotificationFeed::new(store.clone(), user_id.clone(), &config),
            topics: TopicService::new(store.clone(), registry.clone(), fanout.clone()),
            poller: WatermarkPoller::new(store.clone(), fanout.clone(), user_id.clone(), &config),
            registry,
            fanout,
            user_id,
            store,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn current_user(&self) -> Result<UserRecord> {
        load_user(self.store.as_ref(), &self.user_id).await
    }

    /// Session open: heartbeat starts beating, the poller captures a fresh
    /// watermark and runs an immediate first poll.
    pub fn start(&self) {
        info!("session start for {}", self.user_id);
        self.presence.start();
        self.poller.start();
    }

    /// Tab visibility drives the poller; the heartbeat keeps running so the
    /// user stays online while merely backgrounded.
    pub fn set_visible(&self, visible: bool) {
        self.poller.set_visible(visible);
    }

    /// Session teardown. In-flight writes are left to land and be ignored.
    pub async fn stop(&self) {
        info!("session stop for {}", self.user_id);
        self.poller.stop();
        self.presence.stop().await;
    }

    /// Send a direct message and fan out its notification. The message write
    /// is foreground; the notification is best-effort behind it.
    pub async fn send_direct(&self, to: &str, text: impl Into<String>) -> Result<String> {
        let me = self.current_user().await?;
        let (message_id, event) = self.history.send_direct(&me, to, text).await?;
        self.dispatch(event).await;
        Ok(message_id)
    }

    /// Record a gift notification for the recipient. The inventory transfer
    /// itself belongs to the item system, not this core.
    pub async fn send_gift(
        &self,
        to: &str,
        item: impl Into<String>,
        disguised_as: Option<String>,
    ) -> Result<()> {
        let me = self.current_user().await?;
        self.dispatch(SyncEvent::Gift {
            actor: me.id,
            actor_name: me.display_name,
            to: to.to_string(),
            item: item.into(),
            disguised_as,
            created_at: Utc::now(),
        })
        .await;
        Ok(())
    }

    /// Like another user's profile.
    pub async fn like_profile(&self, to: &str) -> Result<()> {
        let me = self.current_user().await?;
        self.dispatch(SyncEvent::ProfileLike {
            actor: me.id,
            actor_name: me.display_name,
            to: to.to_string(),
            created_at: Utc::now(),
        })
        .await;
        Ok(())
    }

    async fn dispatch(&self, event: SyncEvent) {
        if let Err(e) = self.fanout.on_event(&event).await {
            warn!("fan-out failed for {}: {}", self.user_id, e);
        }
    }
}
