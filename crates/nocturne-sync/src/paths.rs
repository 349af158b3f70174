//! Collection paths in the document store. Kept in one place so the layout
//! reads like a schema.

pub const USERS: &str = "users";
pub const NOTIFICATIONS: &str = "notifications";
pub const NEWS: &str = "news";
pub const CHAT_ROSTERS: &str = "chatRosters";
pub const TOPIC_FOLLOWS: &str = "topicFollows";

pub fn conversation_messages(key: &str) -> String {
    format!("conversations/{key}/messages")
}

pub fn forum_topics(forum: &str) -> String {
    format!("forums/{forum}/topics")
}

pub fn topic_posts(forum: &str, topic_id: &str) -> String {
    format!("forums/{forum}/topics/{topic_id}/posts")
}
