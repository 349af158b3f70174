use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::effects::{Effect, EffectSnapshot, Expiry};
use crate::{TopicId, UserId};

/// One document per user in `users/{id}`.
///
/// Owned by the user, but also mutated by other users' actions that target
/// them (gifts, the love effect). The core only ever writes partial merge
/// patches against this record, so fields it never touches (inventory,
/// currency, ...) survive untouched; unknown fields are likewise ignored on
/// read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserRecord {
    /// Filled from the document id on load; never stored in the document.
    #[serde(skip_serializing)]
    pub id: UserId,

    pub display_name: String,

    /// Sparse effect map. Absence of a key and a key with a past deadline are
    /// the same thing to every reader; expired keys are only ever removed as
    /// a side effect of unrelated writes.
    pub status_effects: HashMap<Effect, Expiry>,

    /// Heartbeat-maintained. Presence is derived from recency, not from the
    /// `online` flag alone (the teardown write is best-effort).
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_active: Option<DateTime<Utc>>,
    pub online: bool,

    /// Unique by `topic_id`; insertion order carries no meaning.
    pub followed_topics: Vec<FollowedTopic>,

    /// Persisted watermark for the news feed.
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_seen_news_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Single read path for effect state; never trust key presence alone.
    pub fn effect_active(&self, effect: Effect, now: DateTime<Utc>) -> bool {
        self.status_effects
            .get(&effect)
            .map(|expiry| expiry.is_active(now))
            .unwrap_or(false)
    }

    /// The currently-active subset, recomputed on every read.
    pub fn active_effects(&self, now: DateTime<Utc>) -> EffectSnapshot {
        self.status_effects
            .iter()
            .filter(|(_, expiry)| expiry.is_active(now))
            .map(|(effect, _)| *effect)
            .collect()
    }

    pub fn is_following(&self, topic_id: &str) -> bool {
        self.followed_topics.iter().any(|t| t.topic_id == topic_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FollowedTopic {
    pub topic_id: TopicId,
    pub title: String,
    /// The forum room the topic lives in.
    pub forum: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub followed_at: DateTime<Utc>,
}

/// A chat message in `conversations/{key}/messages`.
///
/// Immutable once created except for `read` and `text` (edit). The effect
/// snapshot is frozen at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing)]
    pub id: String,

    pub from: UserId,
    /// Direct messages carry the counterpart; group messages don't.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<UserId>,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "EffectSnapshot::is_empty")]
    pub effect_snapshot: EffectSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    Reply,
    NewThread,
    Gift,
    Like,
    DirectMessage,
    GroupMessage,
    Mention,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Reply => "reply",
            NotificationKind::NewThread => "newThread",
            NotificationKind::Gift => "gift",
            NotificationKind::Like => "like",
            NotificationKind::DirectMessage => "directMessage",
            NotificationKind::GroupMessage => "groupMessage",
            NotificationKind::Mention => "mention",
        }
    }
}

/// What a notification points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SubjectRef {
    Topic { forum: String, topic_id: TopicId },
    Conversation { key: String },
    Profile { user_id: UserId },
}

/// One document per recipient in `notifications/{id}`, created by the
/// fan-out engine. Immutable except `read`; dismissal is deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, skip_serializing)]
    pub id: String,

    pub to: UserId,
    pub kind: NotificationKind,
    pub subject: SubjectRef,
    pub actor: UserId,
    pub actor_name: String,
    /// Summary line shown in the feed.
    pub body: String,
    /// Gift payload: `item` is what the recipient is shown; `real_item` is
    /// set when the giver disguised it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_item: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    /// Presentation-time grouping key: kind plus the counterpart user for
    /// direct notifications, or the subject for thread notifications. The
    /// stored records stay individual; grouping is a read-time view.
    pub fn group_key(&self) -> String {
        let tail = match (&self.kind, &self.subject) {
            (NotificationKind::Reply | NotificationKind::NewThread, SubjectRef::Topic { topic_id, .. }) => {
                topic_id.clone()
            }
            (NotificationKind::GroupMessage, SubjectRef::Conversation { key }) => key.clone(),
            _ => self.actor.clone(),
        };
        format!("{}:{}", self.kind.as_str(), tail)
    }
}

/// A forum topic in `forums/{room}/topics/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    #[serde(default, skip_serializing)]
    pub id: TopicId,

    pub title: String,
    pub uid: UserId,
    pub author: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// A post inside a topic, `forums/{room}/topics/{id}/posts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(default, skip_serializing)]
    pub id: String,

    pub uid: UserId,
    pub author: String,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// Site news in `news/{id}`. Counts as unseen while newer than the reader's
/// `last_seen_news_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    #[serde(default, skip_serializing)]
    pub id: String,

    pub title: String,
    pub kind: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl NewsItem {
    pub const KIND_NEWS: &'static str = "news";
}
