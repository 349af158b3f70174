use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nocturne_store::{DocumentStore, Query};
use nocturne_types::{FollowedTopic, Post, SyncEvent};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::fanout::FanoutEngine;
use crate::paths;
use crate::records::{decode, load_user};

/// Periodic probe over the polling user's followed topics.
///
/// One in-memory watermark per poller instance, shared by every subject in a
/// cycle: captured once at cycle start, compared against each subject's
/// newest post, then advanced to "now" whether or not anything was found.
/// Only the single most-recent post per subject is ever fetched, so idle
/// subjects cost one small read and the poller holds no state proportional
/// to history.
///
/// `start` captures a fresh watermark, deliberately forgoing activity from
/// before activation; pausing for tab visibility keeps the watermark, so the
/// catch-up poll on resume still sees what happened while hidden.
#[derive(Clone)]
pub struct WatermarkPoller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    store: Arc<dyn DocumentStore>,
    fanout: Arc<FanoutEngine>,
    user_id: String,
    poll_interval: Duration,
    last_poll_at: Mutex<DateTime<Utc>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WatermarkPoller {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        fanout: Arc<FanoutEngine>,
        user_id: impl Into<String>,
        config: &SyncConfig,
    ) -> Self {
        WatermarkPoller {
            inner: Arc::new(PollerInner {
                store,
                fanout,
                user_id: user_id.into(),
                poll_interval: config.poll_interval,
                last_poll_at: Mutex::new(Utc::now()),
                task: Mutex::new(None),
            }),
        }
    }

    /// Begin polling: one cycle immediately, then on the interval. A fresh
    /// watermark is captured from "now" — no partial cycle is ever resumed.
    pub fn start(&self) {
        *self.inner.last_poll_at.lock().expect("watermark lock poisoned") = Utc::now();
        self.spawn_loop();
    }

    /// Tab visibility. Hidden suspends the timer but keeps the watermark;
    /// visible resumes with an immediate catch-up poll.
    pub fn set_visible(&self, visible: bool) {
        if visible {
            self.spawn_loop();
        } else {
            self.abort_loop();
        }
    }

    pub fn stop(&self) {
        self.abort_loop();
    }

    /// One poll cycle, factored out of the timer loop so tests never sleep.
    pub async fn run_cycle(&self) -> Result<usize> {
        let inner = &self.inner;
        let watermark = *inner.last_poll_at.lock().expect("watermark lock poisoned");

        let user = load_user(inner.store.as_ref(), &inner.user_id).await?;
        let mut emitted = 0;
        for topic in &user.followed_topics {
            match self.probe(topic, watermark).await {
                Ok(Some(event)) => match inner.fanout.on_event(&event).await {
                    Ok(_) => emitted += 1,
                    Err(e) => warn!("fan-out failed for topic {}: {}", topic.topic_id, e),
                },
                Ok(None) => {}
                Err(e) => {
                    // One unreadable subject doesn't spoil the cycle.
                    warn!("poll probe failed for topic {}: {}", topic.topic_id, e);
                }
            }
        }

        // Advanced regardless of findings; the next cycle starts here.
        *inner.last_poll_at.lock().expect("watermark lock poisoned") = Utc::now();
        if emitted > 0 {
            debug!("poll cycle emitted {} event(s) for {}", emitted, inner.user_id);
        }
        Ok(emitted)
    }

    /// Newest post for one subject, gated on the cycle watermark and on not
    /// being the polling user's own write.
    async fn probe(&self, topic: &FollowedTopic, watermark: DateTime<Utc>) -> Result<Option<SyncEvent>> {
        let collection = paths::topic_posts(&topic.forum, &topic.topic_id);
        let docs = self
            .inner
            .store
            .query(Query::collection(&collection).order_desc("createdAt").limit(1))
            .await?;
        let Some(doc) = docs.into_iter().next() else {
            return Ok(None);
        };
        let post: Post = decode(&collection, doc)?;

        if post.created_at > watermark && post.uid != self.inner.user_id {
            Ok(Some(SyncEvent::ThreadReply {
                forum: topic.forum.clone(),
                topic_id: topic.topic_id.clone(),
                topic_title: topic.title.clone(),
                actor: post.uid,
                actor_name: post.author,
                created_at: post.created_at,
            }))
        } else {
            Ok(None)
        }
    }

    fn spawn_loop(&self) {
        let mut task = self.inner.task.lock().expect("poller task lock poisoned");
        if task.is_some() {
            return;
        }
        let poller = self.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.inner.poll_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = poller.run_cycle().await {
                    warn!("poll cycle failed for {}: {}", poller.inner.user_id, e);
                }
            }
        }));
    }

    fn abort_loop(&self) {
        if let Some(task) = self.inner.task.lock().expect("poller task lock poisoned").take() {
            task.abort();
        }
    }
}
