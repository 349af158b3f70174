use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use nocturne_store::{DocumentStore, Query, StoreEvent};
use nocturne_types::{NewsItem, Notification, UserRecord};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::paths;
use crate::records::decode;

/// Read side of the notification pipeline: the per-user feed, unread counts,
/// presentation-time grouping, and the bulk read/dismiss operations.
pub struct NotificationFeed {
    store: Arc<dyn DocumentStore>,
    user_id: String,
    fetch_limit: usize,
    display_limit: usize,
}

/// A presentation-time bundle. The stored records stay individual and
/// independently markable; only the view collapses them.
#[derive(Debug, Clone)]
pub struct NotificationGroup {
    pub count: usize,
    pub latest: Notification,
}

impl NotificationGroup {
    pub fn summary(&self) -> String {
        if self.count > 1 {
            format!("{} updates — {}", self.count, self.latest.body)
        } else {
            self.latest.body.clone()
        }
    }
}

impl NotificationFeed {
    pub fn new(store: Arc<dyn DocumentStore>, user_id: impl Into<String>, config: &SyncConfig) -> Self {
        NotificationFeed {
            store,
            user_id: user_id.into(),
            fetch_limit: config.notification_fetch,
            display_limit: config.notification_display,
        }
    }

    /// Newest notifications for this user, newest first. Fetches a wider
    /// page than it shows so ordering survives the store's unordered limit.
    pub async fn feed(&self) -> Result<Vec<Notification>> {
        let docs = self
            .store
            .query(
                Query::collection(paths::NOTIFICATIONS)
                    .filter_eq("to", json!(&self.user_id))
                    .limit(self.fetch_limit),
            )
            .await?;

        let mut list = Vec::new();
        for doc in docs {
            match decode::<Notification>(paths::NOTIFICATIONS, doc) {
                Ok(n) => list.push(n),
                Err(e) => warn!("skipping corrupt notification: {}", e),
            }
        }
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(self.display_limit);
        Ok(list)
    }

    pub async fn unread(&self) -> Result<Vec<Notification>> {
        Ok(self.feed().await?.into_iter().filter(|n| !n.read).collect())
    }

    /// Grouped view for the bell dropdown. Degrades to an empty list on any
    /// failure — a broken feed must never take the UI down with it.
    pub async fn grouped(&self) -> Vec<NotificationGroup> {
        match self.feed().await {
            Ok(list) => group_notifications(list),
            Err(e) => {
                warn!("notification feed unavailable for {}: {}", self.user_id, e);
                Vec::new()
            }
        }
    }

    /// Unread notifications plus unseen news — the badge number.
    pub async fn unread_count(&self, user: &UserRecord) -> Result<usize> {
        let unread = self.unread().await?.len();
        let news = self.unseen_news(user).await?.len();
        Ok(unread + news)
    }

    /// News items newer than the reader's persisted watermark.
    pub async fn unseen_news(&self, user: &UserRecord) -> Result<Vec<NewsItem>> {
        let docs = self
            .store
            .query(Query::collection(paths::NEWS).order_desc("createdAt").limit(10))
            .await?;
        let last_seen = user.last_seen_news_at;

        let mut unseen = Vec::new();
        for doc in docs {
            let item: NewsItem = match decode(paths::NEWS, doc) {
                Ok(item) => item,
                Err(e) => {
                    warn!("skipping corrupt news item: {}", e);
                    continue;
                }
            };
            if item.kind != NewsItem::KIND_NEWS {
                continue;
            }
            if last_seen.map(|seen| item.created_at > seen).unwrap_or(true) {
                unseen.push(item);
            }
        }
        Ok(unseen)
    }

    /// Advance the news watermark to now.
    pub async fn mark_news_seen(&self) -> Result<()> {
        self.store
            .update(
                paths::USERS,
                &self.user_id,
                json!({ "lastSeenNewsAt": Utc::now().timestamp_millis() }),
            )
            .await?;
        Ok(())
    }

    /// One logical operation to the caller, N independent idempotent updates
    /// underneath. Partial failure leaves some unread and is safe to retry.
    pub async fn mark_all_read(&self) -> Result<usize> {
        let unread = self.unread().await?;
        let results = join_all(unread.iter().map(|n| {
            self.store
                .update(paths::NOTIFICATIONS, &n.id, json!({ "read": true }))
        }))
        .await;

        let mut marked = 0;
        for (n, result) in unread.iter().zip(results) {
            match result {
                Ok(()) => marked += 1,
                Err(e) => warn!("mark-read failed for notification {}: {}", n.id, e),
            }
        }
        Ok(marked)
    }

    /// Explicit dismissal removes the record.
    pub async fn dismiss(&self, notification_id: &str) -> Result<()> {
        self.store.delete(paths::NOTIFICATIONS, notification_id).await?;
        Ok(())
    }

    /// Live change feed for the badge; consumers re-query on events and
    /// reset to empty if the feed read fails.
    pub fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.watch(paths::NOTIFICATIONS)
    }
}

/// Collapse a newest-first list by `(kind, counterpart-or-subject)`,
/// preserving recency order of each group's newest member.
pub fn group_notifications(list: Vec<Notification>) -> Vec<NotificationGroup> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, NotificationGroup> = HashMap::new();

    for notification in list {
        let key = notification.group_key();
        match groups.get_mut(&key) {
            Some(group) => group.count += 1,
            None => {
                order.push(key.clone());
                // First sighting is the newest member — the list arrives
                // newest first.
                groups.insert(key, NotificationGroup { count: 1, latest: notification });
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use nocturne_store::MemoryStore;
    use nocturne_types::{NotificationKind, SubjectRef};

    fn notification(to: &str, kind: NotificationKind, actor: &str, offset_ms: i64) -> Notification {
        Notification {
            id: String::new(),
            to: to.into(),
            kind,
            subject: match kind {
                NotificationKind::Reply | NotificationKind::NewThread => SubjectRef::Topic {
                    forum: "moongarden".into(),
                    topic_id: "t1".into(),
                },
                _ => SubjectRef::Profile { user_id: to.into() },
            },
            actor: actor.into(),
            actor_name: actor.into(),
            body: format!("{actor} did a thing"),
            item: None,
            real_item: None,
            created_at: Utc::now() + Duration::milliseconds(offset_ms),
            read: false,
        }
    }

    async fn seed(store: &MemoryStore, n: &Notification) {
        store
            .create(paths::NOTIFICATIONS, serde_json::to_value(n).unwrap())
            .await
            .unwrap();
    }

    fn feed(store: &Arc<MemoryStore>, user: &str) -> NotificationFeed {
        NotificationFeed::new(store.clone(), user, &SyncConfig::default())
    }

    #[tokio::test]
    async fn feed_is_scoped_and_newest_first() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, &notification("me", NotificationKind::Gift, "a", 0)).await;
        seed(&store, &notification("me", NotificationKind::Reply, "b", 5)).await;
        seed(&store, &notification("other", NotificationKind::Gift, "a", 10)).await;

        let list = feed(&store, "me").feed().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].kind, NotificationKind::Reply);
        assert!(list.iter().all(|n| n.to == "me"));
    }

    #[tokio::test]
    async fn mark_all_read_is_idempotent_bulk() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            seed(&store, &notification("me", NotificationKind::Gift, "a", i)).await;
        }
        let feed = feed(&store, "me");
        assert_eq!(feed.mark_all_read().await.unwrap(), 3);
        assert_eq!(feed.unread().await.unwrap().len(), 0);
        // Rerun on an already-read feed touches nothing.
        assert_eq!(feed.mark_all_read().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn grouping_collapses_same_topic_replies() {
        let replies = vec![
            notification("me", NotificationKind::Reply, "b", 10),
            notification("me", NotificationKind::Reply, "c", 5),
            notification("me", NotificationKind::Gift, "b", 1),
        ];
        let groups = group_notifications(replies);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].count, 2);
        assert!(groups[0].summary().starts_with("2 updates"));
        assert_eq!(groups[1].count, 1);
    }

    #[tokio::test]
    async fn news_watermark_is_strictly_greater() {
        let store = Arc::new(MemoryStore::new());
        let t0 = Utc::now();
        for (title, offset) in [("old", -10_000), ("fresh", 10_000)] {
            store
                .create(
                    paths::NEWS,
                    json!({
                        "title": title,
                        "kind": "news",
                        "createdAt": (t0 + Duration::milliseconds(offset)).timestamp_millis(),
                    }),
                )
                .await
                .unwrap();
        }
        let mut user = UserRecord::default();
        user.last_seen_news_at = Some(t0);

        let unseen = feed(&store, "me").unseen_news(&user).await.unwrap();
        assert_eq!(unseen.len(), 1);
        assert_eq!(unseen[0].title, "fresh");
    }
}
