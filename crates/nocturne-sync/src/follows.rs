use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use nocturne_store::{DocumentStore, Query};
use nocturne_types::{FollowedTopic, UserRecord};
use serde_json::json;
use tracing::warn;

use crate::error::{Result, decode_err};
use crate::paths;
use crate::records::{decode, load_user};

/// Who gets notified when a topic moves.
///
/// The relationship itself is always the `followedTopics` entry in the acting
/// user's own record — one-document writes, no reciprocal index required.
/// How `followers_of` answers is the pluggable part: a full scan for small
/// deployments, a maintained reverse index for bigger ones. Correctness tests
/// run against the trait, not an implementation.
#[async_trait]
pub trait FollowerRegistry: Send + Sync {
    async fn followers_of(&self, topic_id: &str) -> Result<HashSet<String>>;

    /// Idempotent: following an already-followed topic changes nothing.
    async fn follow(&self, user_id: &str, topic_id: &str, title: &str, forum: &str) -> Result<()>;

    /// Idempotent: unfollowing a non-followed topic is a no-op.
    async fn unfollow(&self, user_id: &str, topic_id: &str) -> Result<()>;

    async fn is_following(&self, user_id: &str, topic_id: &str) -> Result<bool>;
}

fn entry_for(topic_id: &str, title: &str, forum: &str) -> FollowedTopic {
    FollowedTopic {
        topic_id: topic_id.to_string(),
        title: title.to_string(),
        forum: forum.to_string(),
        followed_at: Utc::now(),
    }
}

async fn write_followed_topics(
    store: &dyn DocumentStore,
    user_id: &str,
    topics: &[FollowedTopic],
) -> Result<()> {
    store
        .update(
            paths::USERS,
            user_id,
            json!({
                "followedTopics": serde_json::to_value(topics)
                    .map_err(|e| decode_err(paths::USERS, e))?
            }),
        )
        .await?;
    Ok(())
}

/// Read-time aggregation over all user records. Trades read cost for write
/// simplicity; fine while the user base is small.
pub struct ScanRegistry {
    store: Arc<dyn DocumentStore>,
}

impl ScanRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        ScanRegistry { store }
    }
}

#[async_trait]
impl FollowerRegistry for ScanRegistry {
    async fn followers_of(&self, topic_id: &str) -> Result<HashSet<String>> {
        let docs = self.store.query(Query::collection(paths::USERS)).await?;
        let mut followers = HashSet::new();
        for doc in docs {
            let user: UserRecord = match decode(paths::USERS, doc) {
                Ok(user) => user,
                Err(e) => {
                    warn!("skipping corrupt user record in follower scan: {}", e);
                    continue;
                }
            };
            if user.is_following(topic_id) {
                followers.insert(user.id);
            }
        }
        Ok(followers)
    }

    async fn follow(&self, user_id: &str, topic_id: &str, title: &str, forum: &str) -> Result<()> {
        let user = load_user(self.store.as_ref(), user_id).await?;
        if user.is_following(topic_id) {
            return Ok(());
        }
        let mut topics = user.followed_topics;
        topics.push(entry_for(topic_id, title, forum));
        write_followed_topics(self.store.as_ref(), user_id, &topics).await
    }

    async fn unfollow(&self, user_id: &str, topic_id: &str) -> Result<()> {
        let user = load_user(self.store.as_ref(), user_id).await?;
        if !user.is_following(topic_id) {
            return Ok(());
        }
        let topics: Vec<FollowedTopic> = user
            .followed_topics
            .into_iter()
            .filter(|t| t.topic_id != topic_id)
            .collect();
        write_followed_topics(self.store.as_ref(), user_id, &topics).await
    }

    async fn is_following(&self, user_id: &str, topic_id: &str) -> Result<bool> {
        let user = load_user(self.store.as_ref(), user_id).await?;
        Ok(user.is_following(topic_id))
    }
}

/// Maintained reverse index: one `topicFollows/{topic_id}` document holding
/// the follower set. `followers_of` becomes a single read; follow/unfollow
/// pay a second write. The user record stays the source of truth for
/// `is_following`, so a diverged index only mis-routes notifications, never
/// the user's own view.
pub struct IndexedRegistry {
    store: Arc<dyn DocumentStore>,
}

impl IndexedRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        IndexedRegistry { store }
    }

    async fn index_followers(&self, topic_id: &str) -> Result<Vec<String>> {
        let doc = self.store.get(paths::TOPIC_FOLLOWS, topic_id).await?;
        Ok(doc
            .and_then(|d| d.data.get("followers").cloned())
            .and_then(|f| serde_json::from_value(f).ok())
            .unwrap_or_default())
    }

    async fn write_index(&self, topic_id: &str, followers: &[String]) -> Result<()> {
        self.store
            .set(paths::TOPIC_FOLLOWS, topic_id, json!({ "followers": followers }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FollowerRegistry for IndexedRegistry {
    async fn followers_of(&self, topic_id: &str) -> Result<HashSet<String>> {
        Ok(self.index_followers(topic_id).await?.into_iter().collect())
    }

    async fn follow(&self, user_id: &str, topic_id: &str, title: &str, forum: &str) -> Result<()> {
        let user = load_user(self.store.as_ref(), user_id).await?;
        if !user.is_following(topic_id) {
            let mut topics = user.followed_topics;
            topics.push(entry_for(topic_id, title, forum));
            write_followed_topics(self.store.as_ref(), user_id, &topics).await?;
        }

        let mut followers = self.index_followers(topic_id).await?;
        if !followers.iter().any(|f| f == user_id) {
            followers.push(user_id.to_string());
            self.write_index(topic_id, &followers).await?;
        }
        Ok(())
    }

    async fn unfollow(&self, user_id: &str, topic_id: &str) -> Result<()> {
        let user = load_user(self.store.as_ref(), user_id).await?;
        if user.is_following(topic_id) {
            let topics: Vec<FollowedTopic> = user
                .followed_topics
                .into_iter()
                .filter(|t| t.topic_id != topic_id)
                .collect();
            write_followed_topics(self.store.as_ref(), user_id, &topics).await?;
        }

        let mut followers = self.index_followers(topic_id).await?;
        let before = followers.len();
        followers.retain(|f| f != user_id);
        if followers.len() != before {
            self.write_index(topic_id, &followers).await?;
        }
        Ok(())
    }

    async fn is_following(&self, user_id: &str, topic_id: &str) -> Result<bool> {
        let user = load_user(self.store.as_ref(), user_id).await?;
        Ok(user.is_following(topic_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nocturne_store::MemoryStore;

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for id in ["xenia", "yorick", "zara"] {
            store
                .set(paths::USERS, id, json!({"displayName": id}))
                .await
                .unwrap();
        }
        store
    }

    async fn check_registry(registry: &dyn FollowerRegistry) {
        // Follow twice: exactly one entry, one follower.
        registry.follow("xenia", "t1", "Moon rites", "moongarden").await.unwrap();
        registry.follow("xenia", "t1", "Moon rites", "moongarden").await.unwrap();
        assert!(registry.is_following("xenia", "t1").await.unwrap());

        let followers = registry.followers_of("t1").await.unwrap();
        assert_eq!(followers, HashSet::from(["xenia".to_string()]));

        // A non-follower never appears.
        assert!(!registry.is_following("yorick", "t1").await.unwrap());

        registry.follow("zara", "t1", "Moon rites", "moongarden").await.unwrap();
        assert_eq!(registry.followers_of("t1").await.unwrap().len(), 2);

        // Unfollow removes, and is a no-op on strangers.
        registry.unfollow("xenia", "t1").await.unwrap();
        registry.unfollow("yorick", "t1").await.unwrap();
        let followers = registry.followers_of("t1").await.unwrap();
        assert_eq!(followers, HashSet::from(["zara".to_string()]));
    }

    #[tokio::test]
    async fn scan_registry_properties() {
        let store = seeded_store().await;
        check_registry(&ScanRegistry::new(store)).await;
    }

    #[tokio::test]
    async fn indexed_registry_properties() {
        let store = seeded_store().await;
        check_registry(&IndexedRegistry::new(store)).await;
    }

    #[tokio::test]
    async fn follow_keeps_single_entry_in_user_record() {
        let store = seeded_store().await;
        let registry = ScanRegistry::new(store.clone());
        registry.follow("xenia", "t1", "Moon rites", "moongarden").await.unwrap();
        registry.follow("xenia", "t1", "Moon rites", "moongarden").await.unwrap();

        let doc = store.get(paths::USERS, "xenia").await.unwrap().unwrap();
        assert_eq!(doc.data["followedTopics"].as_array().unwrap().len(), 1);
    }
}
