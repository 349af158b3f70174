pub mod memory;
pub mod query;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub use memory::MemoryStore;
pub use query::{Filter, Op, OrderBy, Query};
pub use sqlite::SqliteStore;

pub type DocId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub data: Value,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// A class the core does not remediate; callers degrade to empty results.
    #[error("permission denied on {0}")]
    PermissionDenied(String),

    /// Transient (network/quota). Background operations log and let the next
    /// scheduled cycle retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt document in {collection}: {source}")]
    Corrupt {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A change observed on a watched collection.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub collection: String,
    pub id: DocId,
    pub change: Change,
}

#[derive(Debug, Clone)]
pub enum Change {
    Created(Value),
    /// Carries the full post-merge document, not the patch.
    Updated(Value),
    Deleted,
}

/// The persistence collaborator: a reactive document store.
///
/// Everything the synchronization core persists goes through this interface.
/// Writes are last-write-wins; `update` has merge semantics so concurrent
/// writers touching different fields of the same record don't clobber each
/// other. `watch` is the push channel, used only where near-real-time
/// visibility matters.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    async fn query(&self, query: Query) -> Result<Vec<Document>>;

    /// Insert with a store-minted id.
    async fn create(&self, collection: &str, data: Value) -> Result<DocId>;

    /// Upsert the full document.
    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<()>;

    /// Merge `patch` into an existing document. Maps merge one level deep, so
    /// a patch of `{statusEffects: {glow: ...}}` leaves sibling effect keys
    /// in place; any other value replaces wholesale. Errors with `NotFound`
    /// if the document does not exist.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Live change feed for one collection. Lagged receivers miss events;
    /// consumers are expected to re-query, never to crash.
    fn watch(&self, collection: &str) -> broadcast::Receiver<StoreEvent>;
}

/// One-level-deep merge used by `update` implementations.
pub(crate) fn merge_patch(existing: &mut Value, patch: Value) {
    match (existing, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, incoming) in patch {
                match (base.get_mut(&key), incoming) {
                    (Some(Value::Object(nested)), Value::Object(incoming_map)) => {
                        for (k, v) in incoming_map {
                            nested.insert(k, v);
                        }
                    }
                    (_, incoming) => {
                        base.insert(key, incoming);
                    }
                }
            }
        }
        (existing, patch) => *existing = patch,
    }
}
