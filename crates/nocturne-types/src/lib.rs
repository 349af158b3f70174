pub mod effects;
pub mod events;
pub mod models;

pub use effects::{Effect, EffectSnapshot, Expiry};
pub use events::SyncEvent;
pub use models::{
    FollowedTopic, Message, NewsItem, Notification, NotificationKind, Post, SubjectRef, Topic,
    UserRecord,
};

/// Document ids are opaque strings minted by the document store.
pub type UserId = String;
pub type TopicId = String;
