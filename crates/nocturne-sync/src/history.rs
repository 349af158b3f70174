use std::sync::Arc;

use chrono::Utc;
use nocturne_store::{DocumentStore, Query};
use nocturne_types::{Message, SyncEvent, UserRecord};
use serde_json::json;
use tracing::warn;

use crate::config::SyncConfig;
use crate::error::{Result, decode_err};
use crate::paths;
use crate::records::decode;

/// Deterministic key for a direct conversation: the sorted participant pair.
/// Both ends derive the same key without coordination.
pub fn conversation_key(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}_{hi}")
}

/// Append-only per-conversation logs capped at `max_history` messages.
///
/// The cap is best-effort and asynchronous: an append may transiently push a
/// conversation over budget until the trim pass lands, and the read path
/// always windows to the newest `max_history` regardless. Trim failures are
/// swallowed; the next successful append's trim self-heals.
pub struct ChatHistory {
    store: Arc<dyn DocumentStore>,
    max_history: usize,
}

impl ChatHistory {
    pub fn new(store: Arc<dyn DocumentStore>, config: &SyncConfig) -> Self {
        ChatHistory { store, max_history: config.max_history }
    }

    /// Append one message. The returned id is available as soon as the write
    /// acks; trim runs behind it and never blocks the sender.
    pub async fn append(&self, conversation: &str, message: &Message) -> Result<String> {
        let collection = paths::conversation_messages(conversation);
        let data = serde_json::to_value(message).map_err(|e| decode_err(&collection, e))?;
        let id = self.store.create(&collection, data).await?;
        self.spawn_trim(conversation);
        Ok(id)
    }

    /// Send a direct message: snapshot the sender's active effects, append,
    /// and idempotently put each party on the other's chat roster. Returns
    /// the message id and the fan-out event for the caller to dispatch.
    pub async fn send_direct(
        &self,
        sender: &UserRecord,
        to: &str,
        text: impl Into<String>,
    ) -> Result<(String, SyncEvent)> {
        let now = Utc::now();
        let key = conversation_key(&sender.id, to);
        let message = Message {
            id: String::new(),
            from: sender.id.clone(),
            to: Some(to.to_string()),
            text: text.into(),
            created_at: now,
            read: false,
            effect_snapshot: sender.active_effects(now),
        };
        let id = self.append(&key, &message).await?;

        // Roster writes ride behind the ack, best-effort on both sides.
        self.roster_add(&sender.id, to).await;
        self.roster_add(to, &sender.id).await;

        let event = SyncEvent::DirectMessage {
            actor: sender.id.clone(),
            actor_name: sender.display_name.clone(),
            to: to.to_string(),
            conversation: key,
            created_at: now,
        };
        Ok((id, event))
    }

    /// Newest `max_history` messages in ascending time order, independent of
    /// whether trim has physically caught up.
    pub async fn visible_messages(&self, conversation: &str) -> Result<Vec<Message>> {
        let collection = paths::conversation_messages(conversation);
        let docs = self
            .store
            .query(
                Query::collection(&collection)
                    .order_desc("createdAt")
                    .limit(self.max_history),
            )
            .await?;
        let mut messages = docs
            .into_iter()
            .map(|doc| decode::<Message>(&collection, doc))
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Bring the stored log back under budget. Idempotent: on an already
    /// compliant conversation this deletes nothing.
    pub async fn trim(&self, conversation: &str) -> Result<usize> {
        trim_collection(
            self.store.as_ref(),
            &paths::conversation_messages(conversation),
            self.max_history,
        )
        .await
    }

    pub async fn edit_message(&self, conversation: &str, message_id: &str, text: &str) -> Result<()> {
        self.store
            .update(
                &paths::conversation_messages(conversation),
                message_id,
                json!({ "text": text }),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_message(&self, conversation: &str, message_id: &str) -> Result<()> {
        self.store
            .delete(&paths::conversation_messages(conversation), message_id)
            .await?;
        Ok(())
    }

    /// Unread = addressed to the reader and not yet read. Sender's own
    /// messages never count.
    pub async fn unread_count(&self, conversation: &str, reader: &str) -> Result<usize> {
        let collection = paths::conversation_messages(conversation);
        let docs = self
            .store
            .query(
                Query::collection(&collection)
                    .filter_eq("to", json!(reader))
                    .filter_eq("read", json!(false)),
            )
            .await?;
        Ok(docs.len())
    }

    /// Mark everything addressed to the reader as read. Independent updates;
    /// a partial failure leaves some unread and is safe to rerun.
    pub async fn mark_read(&self, conversation: &str, reader: &str) -> Result<usize> {
        let collection = paths::conversation_messages(conversation);
        let docs = self
            .store
            .query(
                Query::collection(&collection)
                    .filter_eq("to", json!(reader))
                    .filter_eq("read", json!(false)),
            )
            .await?;
        let mut marked = 0;
        for doc in docs {
            match self.store.update(&collection, &doc.id, json!({ "read": true })).await {
                Ok(()) => marked += 1,
                Err(e) => warn!("mark-read failed for {}/{}: {}", collection, doc.id, e),
            }
        }
        Ok(marked)
    }

    /// The counterpart uids this user has open conversations with.
    pub async fn roster(&self, user_id: &str) -> Result<Vec<String>> {
        let doc = self.store.get(paths::CHAT_ROSTERS, user_id).await?;
        Ok(doc
            .and_then(|d| d.data.get("chats").cloned())
            .and_then(|chats| serde_json::from_value(chats).ok())
            .unwrap_or_default())
    }

    /// Live change feed for the open conversation; consumers re-query the
    /// visible window on events.
    pub fn watch(&self, conversation: &str) -> tokio::sync::broadcast::Receiver<nocturne_store::StoreEvent> {
        self.store.watch(&paths::conversation_messages(conversation))
    }

    fn spawn_trim(&self, conversation: &str) {
        let store = self.store.clone();
        let collection = paths::conversation_messages(conversation);
        let max = self.max_history;
        tokio::spawn(async move {
            if let Err(e) = trim_collection(store.as_ref(), &collection, max).await {
                warn!("history trim failed for {}: {}", collection, e);
            }
        });
    }

    async fn roster_add(&self, owner: &str, peer: &str) {
        let result: Result<()> = async {
            let mut chats = self.roster(owner).await?;
            if !chats.iter().any(|c| c == peer) {
                chats.push(peer.to_string());
                self.store
                    .set(paths::CHAT_ROSTERS, owner, json!({ "chats": chats }))
                    .await?;
            }
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!("chat roster update dropped for {}: {}", owner, e);
        }
    }
}

/// Delete oldest-first until the stored count is within `max`. Runs in a
/// loop so a concurrent append between fetch and delete still converges.
async fn trim_collection(store: &dyn DocumentStore, collection: &str, max: usize) -> Result<usize> {
    let mut removed = 0;
    loop {
        let docs = store
            .query(Query::collection(collection).order_asc("createdAt"))
            .await?;
        if docs.len() <= max {
            return Ok(removed);
        }
        let overflow = docs.len() - max;
        for doc in docs.into_iter().take(overflow) {
            store.delete(collection, &doc.id).await?;
            removed += 1;
        }
    }
}
