use std::sync::Arc;

use chrono::Utc;
use nocturne_store::DocumentStore;
use nocturne_types::{Effect, EffectSnapshot, Expiry, UserRecord};
use serde_json::{Map, Value, json};

use crate::error::Result;
use crate::paths;
use crate::records::load_user;

/// Applies and reads time-bounded status effects on user records.
///
/// Reads go through `UserRecord::active_effects` / `effect_active`, which
/// re-validate expiry on every call — stored deadlines are never trusted to
/// have been cleaned up, and this store never deletes expired keys itself.
pub struct EffectStore {
    store: Arc<dyn DocumentStore>,
}

impl EffectStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        EffectStore { store }
    }

    /// Apply `effect` to `user_id` for its fixed duration, overwriting any
    /// existing deadline for that name. Foreground operation: the error goes
    /// to the caller and nothing is retried here.
    pub async fn apply(&self, user_id: &str, effect: Effect) -> Result<Expiry> {
        let expiry = Expiry::after(Utc::now(), effect.duration());

        // One-key merge patch; sibling effects and unrelated fields survive.
        let mut effects = Map::new();
        effects.insert(
            effect.as_str().to_string(),
            Value::from(expiry.deadline().timestamp_millis()),
        );
        self.store
            .update(paths::USERS, user_id, json!({ "statusEffects": effects }))
            .await?;
        Ok(expiry)
    }

    /// The sender-side freeze for outgoing messages: whatever is active right
    /// now, as a snapshot that later expiry can't rewrite.
    pub async fn snapshot(&self, user_id: &str) -> Result<EffectSnapshot> {
        let user = load_user(self.store.as_ref(), user_id).await?;
        Ok(user.active_effects(Utc::now()))
    }

    pub async fn active_effects(&self, user_id: &str) -> Result<EffectSnapshot> {
        self.snapshot(user_id).await
    }

    pub async fn is_active(&self, user_id: &str, effect: Effect) -> Result<bool> {
        let user = load_user(self.store.as_ref(), user_id).await?;
        Ok(user.effect_active(effect, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use nocturne_store::MemoryStore;
    use serde_json::json;

    async fn store_with_user(id: &str) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .set(paths::USERS, id, json!({"displayName": id, "currency": 300}))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn apply_sets_a_future_deadline() {
        let store = store_with_user("u1").await;
        let effects = EffectStore::new(store.clone());

        let expiry = effects.apply("u1", Effect::Rainbow).await.unwrap();
        assert!(expiry.is_active(Utc::now()));
        assert!(effects.is_active("u1", Effect::Rainbow).await.unwrap());
        assert!(!effects.is_active("u1", Effect::Glow).await.unwrap());
    }

    #[tokio::test]
    async fn reapply_overwrites_never_stacks() {
        let store = store_with_user("u1").await;
        let effects = EffectStore::new(store.clone());

        let first = effects.apply("u1", Effect::Glow).await.unwrap();
        let second = effects.apply("u1", Effect::Glow).await.unwrap();

        // The second deadline replaces the first; it is not first + duration.
        assert!(second.deadline() >= first.deadline());
        assert!(second.deadline() < first.deadline() + Duration::seconds(60));

        let doc = store.get(paths::USERS, "u1").await.unwrap().unwrap();
        let map = doc.data["statusEffects"].as_object().unwrap();
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn expired_keys_read_as_inactive_but_stay_stored() {
        let store = store_with_user("u1").await;
        let past = (Utc::now() - Duration::hours(1)).timestamp_millis();
        store
            .update(paths::USERS, "u1", json!({"statusEffects": {"sparkle": past}}))
            .await
            .unwrap();

        let effects = EffectStore::new(store.clone());
        assert!(!effects.is_active("u1", Effect::Sparkle).await.unwrap());
        assert!(effects.snapshot("u1").await.unwrap().is_empty());

        // The stale key is still physically present — no sweep.
        let doc = store.get(paths::USERS, "u1").await.unwrap().unwrap();
        assert!(doc.data["statusEffects"].get("sparkle").is_some());
    }

    #[tokio::test]
    async fn apply_preserves_unrelated_fields_and_sibling_effects() {
        let store = store_with_user("u1").await;
        let effects = EffectStore::new(store.clone());

        effects.apply("u1", Effect::Rainbow).await.unwrap();
        effects.apply("u1", Effect::Whisper).await.unwrap();

        let doc = store.get(paths::USERS, "u1").await.unwrap().unwrap();
        assert_eq!(doc.data["currency"], 300);
        let map = doc.data["statusEffects"].as_object().unwrap();
        assert!(map.contains_key("rainbow"));
        assert!(map.contains_key("whisper"));
    }
}
