use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{NotificationKind, SubjectRef};
use crate::{TopicId, UserId};

/// A qualifying activity event, in the one shape shared by push subscriptions
/// and the watermark poller. The fan-out engine consumes these without caring
/// which kind of source produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Someone replied to a forum topic.
    ThreadReply {
        forum: String,
        topic_id: TopicId,
        topic_title: String,
        actor: UserId,
        actor_name: String,
        created_at: DateTime<Utc>,
    },

    /// A new topic was opened.
    NewThread {
        forum: String,
        topic_id: TopicId,
        topic_title: String,
        actor: UserId,
        actor_name: String,
        created_at: DateTime<Utc>,
    },

    /// An item was gifted, possibly disguised as something else.
    Gift {
        actor: UserId,
        actor_name: String,
        to: UserId,
        item: String,
        disguised_as: Option<String>,
        created_at: DateTime<Utc>,
    },

    /// A direct message arrived.
    DirectMessage {
        actor: UserId,
        actor_name: String,
        to: UserId,
        conversation: String,
        created_at: DateTime<Utc>,
    },

    /// Someone liked a profile.
    ProfileLike {
        actor: UserId,
        actor_name: String,
        to: UserId,
        created_at: DateTime<Utc>,
    },
}

impl SyncEvent {
    pub fn kind(&self) -> NotificationKind {
        match self {
            SyncEvent::ThreadReply { .. } => NotificationKind::Reply,
            SyncEvent::NewThread { .. } => NotificationKind::NewThread,
            SyncEvent::Gift { .. } => NotificationKind::Gift,
            SyncEvent::DirectMessage { .. } => NotificationKind::DirectMessage,
            SyncEvent::ProfileLike { .. } => NotificationKind::Like,
        }
    }

    pub fn actor(&self) -> &str {
        match self {
            SyncEvent::ThreadReply { actor, .. }
            | SyncEvent::NewThread { actor, .. }
            | SyncEvent::Gift { actor, .. }
            | SyncEvent::DirectMessage { actor, .. }
            | SyncEvent::ProfileLike { actor, .. } => actor,
        }
    }

    pub fn actor_name(&self) -> &str {
        match self {
            SyncEvent::ThreadReply { actor_name, .. }
            | SyncEvent::NewThread { actor_name, .. }
            | SyncEvent::Gift { actor_name, .. }
            | SyncEvent::DirectMessage { actor_name, .. }
            | SyncEvent::ProfileLike { actor_name, .. } => actor_name,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            SyncEvent::ThreadReply { created_at, .. }
            | SyncEvent::NewThread { created_at, .. }
            | SyncEvent::Gift { created_at, .. }
            | SyncEvent::DirectMessage { created_at, .. }
            | SyncEvent::ProfileLike { created_at, .. } => *created_at,
        }
    }

    /// The single explicit target for direct events; thread events resolve
    /// their recipients through the follower registry instead.
    pub fn explicit_recipient(&self) -> Option<&str> {
        match self {
            SyncEvent::Gift { to, .. }
            | SyncEvent::DirectMessage { to, .. }
            | SyncEvent::ProfileLike { to, .. } => Some(to),
            SyncEvent::ThreadReply { .. } | SyncEvent::NewThread { .. } => None,
        }
    }

    pub fn subject(&self) -> SubjectRef {
        match self {
            SyncEvent::ThreadReply { forum, topic_id, .. }
            | SyncEvent::NewThread { forum, topic_id, .. } => SubjectRef::Topic {
                forum: forum.clone(),
                topic_id: topic_id.clone(),
            },
            SyncEvent::DirectMessage { conversation, .. } => SubjectRef::Conversation {
                key: conversation.clone(),
            },
            SyncEvent::Gift { to, .. } | SyncEvent::ProfileLike { to, .. } => SubjectRef::Profile {
                user_id: to.clone(),
            },
        }
    }

    /// Summary line for the notification feed.
    pub fn summary(&self) -> String {
        match self {
            SyncEvent::ThreadReply { actor_name, topic_title, .. } => {
                format!("{} replied in \"{}\"", actor_name, topic_title)
            }
            SyncEvent::NewThread { actor_name, topic_title, .. } => {
                format!("{} opened \"{}\"", actor_name, topic_title)
            }
            SyncEvent::Gift { actor_name, item, disguised_as, .. } => {
                let shown = disguised_as.as_deref().unwrap_or(item);
                format!("You received a gift from {}: {}", actor_name, shown)
            }
            SyncEvent::DirectMessage { actor_name, .. } => {
                format!("New message from {}", actor_name)
            }
            SyncEvent::ProfileLike { actor_name, .. } => {
                format!("{} liked your profile", actor_name)
            }
        }
    }
}
