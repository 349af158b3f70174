use std::sync::Arc;

use chrono::Utc;
use nocturne_store::DocumentStore;
use nocturne_types::{Post, SyncEvent, Topic, UserRecord};
use serde_json::json;
use tracing::warn;

use crate::error::{Result, SyncError, decode_err};
use crate::fanout::FanoutEngine;
use crate::follows::FollowerRegistry;
use crate::paths;
use crate::records::decode;

/// Forum write operations.
///
/// Auto-follow is an explicit step of every create/reply, performed exactly
/// once and strictly before the fan-out computes recipients — it is a
/// precondition here, not an accident of statement order. Fan-out failure
/// never fails the post itself.
pub struct TopicService {
    store: Arc<dyn DocumentStore>,
    registry: Arc<dyn FollowerRegistry>,
    fanout: Arc<FanoutEngine>,
}

impl TopicService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<dyn FollowerRegistry>,
        fanout: Arc<FanoutEngine>,
    ) -> Self {
        TopicService { store, registry, fanout }
    }

    /// Open a topic with its first post. The author is auto-followed, so the
    /// recipient set for this event is `followers \ {author}` — empty for a
    /// brand-new topic.
    pub async fn create_topic(
        &self,
        actor: &UserRecord,
        forum: &str,
        title: &str,
        content: &str,
    ) -> Result<String> {
        let now = Utc::now();
        let topics = paths::forum_topics(forum);
        let topic = Topic {
            id: String::new(),
            title: title.to_string(),
            uid: actor.id.clone(),
            author: actor.display_name.clone(),
            created_at: now,
        };
        let topic_id = self
            .store
            .create(&topics, serde_json::to_value(&topic).map_err(|e| decode_err(&topics, e))?)
            .await?;

        self.write_post(forum, &topic_id, actor, content, now).await?;

        self.registry.follow(&actor.id, &topic_id, title, forum).await?;
        self.dispatch(SyncEvent::NewThread {
            forum: forum.to_string(),
            topic_id: topic_id.clone(),
            topic_title: title.to_string(),
            actor: actor.id.clone(),
            actor_name: actor.display_name.clone(),
            created_at: now,
        })
        .await;

        Ok(topic_id)
    }

    /// Reply to an existing topic. Replying auto-follows (idempotently)
    /// before recipients are computed.
    pub async fn reply(
        &self,
        actor: &UserRecord,
        forum: &str,
        topic_id: &str,
        content: &str,
    ) -> Result<String> {
        let topics = paths::forum_topics(forum);
        let doc = self
            .store
            .get(&topics, topic_id)
            .await?
            .ok_or_else(|| SyncError::UnknownTopic(topic_id.to_string()))?;
        let topic: Topic = decode(&topics, doc)?;

        // One timestamp for the post and its event: the pair is the event's
        // delivery identity, so they must never drift apart.
        let now = Utc::now();
        let post_id = self.write_post(forum, topic_id, actor, content, now).await?;

        self.registry
            .follow(&actor.id, topic_id, &topic.title, forum)
            .await?;
        self.dispatch(SyncEvent::ThreadReply {
            forum: forum.to_string(),
            topic_id: topic_id.to_string(),
            topic_title: topic.title,
            actor: actor.id.clone(),
            actor_name: actor.display_name.clone(),
            created_at: now,
        })
        .await;

        Ok(post_id)
    }

    pub async fn edit_post(
        &self,
        forum: &str,
        topic_id: &str,
        post_id: &str,
        content: &str,
    ) -> Result<()> {
        self.store
            .update(
                &paths::topic_posts(forum, topic_id),
                post_id,
                json!({ "content": content }),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_post(&self, forum: &str, topic_id: &str, post_id: &str) -> Result<()> {
        self.store
            .delete(&paths::topic_posts(forum, topic_id), post_id)
            .await?;
        Ok(())
    }

    /// Delete a topic and everything under it, posts first.
    pub async fn delete_topic(&self, forum: &str, topic_id: &str) -> Result<()> {
        let posts = paths::topic_posts(forum, topic_id);
        let docs = self
            .store
            .query(nocturne_store::Query::collection(&posts))
            .await?;
        for doc in docs {
            self.store.delete(&posts, &doc.id).await?;
        }
        self.store.delete(&paths::forum_topics(forum), topic_id).await?;
        Ok(())
    }

    async fn write_post(
        &self,
        forum: &str,
        topic_id: &str,
        actor: &UserRecord,
        content: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<String> {
        let posts = paths::topic_posts(forum, topic_id);
        let post = Post {
            id: String::new(),
            uid: actor.id.clone(),
            author: actor.display_name.clone(),
            content: content.to_string(),
            created_at: now,
        };
        let id = self
            .store
            .create(&posts, serde_json::to_value(&post).map_err(|e| decode_err(&posts, e))?)
            .await?;
        Ok(id)
    }

    async fn dispatch(&self, event: SyncEvent) {
        if let Err(e) = self.fanout.on_event(&event).await {
            // The post already landed; notification delivery retries on the
            // next poll cycle that sees it.
            warn!("fan-out failed after forum write: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::follows::ScanRegistry;
    use nocturne_store::{MemoryStore, Query};

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<ScanRegistry>,
        service: TopicService,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        for id in ["zelda", "xan"] {
            store
                .set(paths::USERS, id, json!({"displayName": id}))
                .await
                .unwrap();
        }
        let registry = Arc::new(ScanRegistry::new(store.clone()));
        let fanout = Arc::new(FanoutEngine::new(store.clone(), registry.clone()));
        let service = TopicService::new(store.clone(), registry.clone(), fanout);
        Fixture { store, registry, service }
    }

    fn user(id: &str) -> UserRecord {
        let mut user = UserRecord::default();
        user.id = id.into();
        user.display_name = id.into();
        user
    }

    async fn notifications_for(store: &MemoryStore, to: &str) -> usize {
        store
            .query(Query::collection(paths::NOTIFICATIONS).filter_eq("to", json!(to)))
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn creating_a_topic_auto_follows_without_self_notification() {
        let f = fixture().await;
        let topic_id = f
            .service
            .create_topic(&user("zelda"), "moongarden", "Moon rites", "First post")
            .await
            .unwrap();

        assert!(f.registry.is_following("zelda", &topic_id).await.unwrap());
        // The author replying to their own fresh topic notifies nobody.
        f.service
            .reply(&user("zelda"), "moongarden", &topic_id, "Me again")
            .await
            .unwrap();
        assert_eq!(notifications_for(&f.store, "zelda").await, 0);
    }

    #[tokio::test]
    async fn reply_notifies_followers_and_auto_follows_the_replier() {
        let f = fixture().await;
        let topic_id = f
            .service
            .create_topic(&user("zelda"), "moongarden", "Moon rites", "First post")
            .await
            .unwrap();

        // xan was not following before replying.
        assert!(!f.registry.is_following("xan", &topic_id).await.unwrap());
        f.service
            .reply(&user("xan"), "moongarden", &topic_id, "Interesting")
            .await
            .unwrap();

        assert!(f.registry.is_following("xan", &topic_id).await.unwrap());
        assert_eq!(notifications_for(&f.store, "zelda").await, 1);
        assert_eq!(notifications_for(&f.store, "xan").await, 0);
    }

    #[tokio::test]
    async fn reply_to_missing_topic_is_an_error() {
        let f = fixture().await;
        let err = f
            .service
            .reply(&user("xan"), "moongarden", "ghost", "hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownTopic(_)));
    }

    #[tokio::test]
    async fn delete_topic_removes_posts_first() {
        let f = fixture().await;
        let topic_id = f
            .service
            .create_topic(&user("zelda"), "moongarden", "Moon rites", "First post")
            .await
            .unwrap();
        f.service
            .reply(&user("xan"), "moongarden", &topic_id, "reply")
            .await
            .unwrap();

        f.service.delete_topic("moongarden", &topic_id).await.unwrap();
        let posts = f
            .store
            .query(Query::collection(&paths::topic_posts("moongarden", &topic_id)))
            .await
            .unwrap();
        assert!(posts.is_empty());
        assert!(
            f.store
                .get(&paths::forum_topics("moongarden"), &topic_id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
