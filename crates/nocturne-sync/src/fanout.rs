use std::sync::Arc;

use nocturne_store::{DocumentStore, Query};
use nocturne_types::{Notification, SubjectRef, SyncEvent};
use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::follows::FollowerRegistry;
use crate::paths;

/// Turns qualifying events into per-recipient notification records.
///
/// Fan-out is a loop of independent best-effort writes, never an atomic
/// batch: one recipient's failed write must not cost the others their
/// notification. Delivery is made idempotent by an existence probe keyed on
/// the event identity, so a retried event or two overlapping poll cycles
/// land exactly one record per recipient.
pub struct FanoutEngine {
    store: Arc<dyn DocumentStore>,
    registry: Arc<dyn FollowerRegistry>,
}

impl FanoutEngine {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<dyn FollowerRegistry>) -> Self {
        FanoutEngine { store, registry }
    }

    /// Deliver `event` to its recipient set. Thread events resolve followers
    /// minus the actor; direct events go to their explicit target. Returns
    /// how many notifications were actually written.
    pub async fn on_event(&self, event: &SyncEvent) -> Result<usize> {
        let recipients: Vec<String> = match event.explicit_recipient() {
            Some(to) => vec![to.to_string()],
            None => {
                let SubjectRef::Topic { topic_id, .. } = event.subject() else {
                    return Ok(0);
                };
                self.registry
                    .followers_of(&topic_id)
                    .await?
                    .into_iter()
                    .filter(|r| r != event.actor())
                    .collect()
            }
        };

        let mut delivered = 0;
        for to in recipients {
            if self.already_delivered(&to, event).await {
                continue;
            }
            let notification = build_notification(&to, event);
            let data = match serde_json::to_value(&notification) {
                Ok(data) => data,
                Err(e) => {
                    warn!("unencodable notification for {}: {}", to, e);
                    continue;
                }
            };
            match self.store.create(paths::NOTIFICATIONS, data).await {
                Ok(_) => delivered += 1,
                Err(e) => {
                    // Independent failure; the remaining recipients still get theirs.
                    warn!("notification write failed for {}: {}", to, e);
                }
            }
        }
        Ok(delivered)
    }

    /// Has this exact event already produced a record for `to`? Identity is
    /// (recipient, kind, actor, source timestamp). When the probe itself
    /// fails we deliver anyway — at-least-once beats silently dropping.
    async fn already_delivered(&self, to: &str, event: &SyncEvent) -> bool {
        let kind = match serde_json::to_value(event.kind()) {
            Ok(kind) => kind,
            Err(_) => return false,
        };
        let query = Query::collection(paths::NOTIFICATIONS)
            .filter_eq("to", json!(to))
            .filter_eq("kind", kind)
            .filter_eq("actor", json!(event.actor()))
            .filter_eq("createdAt", json!(event.created_at().timestamp_millis()))
            .limit(1);
        match self.store.query(query).await {
            Ok(docs) => !docs.is_empty(),
            Err(e) => {
                warn!("delivery probe failed for {}: {}", to, e);
                false
            }
        }
    }
}

fn build_notification(to: &str, event: &SyncEvent) -> Notification {
    let (item, real_item) = match event {
        SyncEvent::Gift { item, disguised_as, .. } => match disguised_as {
            Some(shown) => (Some(shown.clone()), Some(item.clone())),
            None => (Some(item.clone()), None),
        },
        _ => (None, None),
    };
    Notification {
        id: String::new(),
        to: to.to_string(),
        kind: event.kind(),
        subject: event.subject(),
        actor: event.actor().to_string(),
        actor_name: event.actor_name().to_string(),
        body: event.summary(),
        item,
        real_item,
        created_at: event.created_at(),
        read: false,
    }
}
