use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    Change, DocId, Document, DocumentStore, Query, Result, StoreError, StoreEvent, merge_patch,
};

/// In-memory reactive document store.
///
/// The canonical test double, and good enough as a real backend for a single
/// process. Collections are keyed by their full path ("users",
/// "conversations/{key}/messages", ...); each carries its own change feed.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<DocId, Value>>>,
    watchers: Mutex<HashMap<String, broadcast::Sender<StoreEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            collections: RwLock::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    fn emit(&self, collection: &str, id: &str, change: Change) {
        let watchers = self.watchers.lock().expect("watchers lock poisoned");
        if let Some(tx) = watchers.get(collection) {
            // No receivers is fine; the send result is irrelevant.
            let _ = tx.send(StoreEvent {
                collection: collection.to_string(),
                id: id.to_string(),
                change,
            });
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let collections = self.collections.read().expect("collections lock poisoned");
        Ok(collections.get(collection).and_then(|docs| {
            docs.get(id).map(|data| Document { id: id.to_string(), data: data.clone() })
        }))
    }

    async fn query(&self, query: Query) -> Result<Vec<Document>> {
        let collections = self.collections.read().expect("collections lock poisoned");
        let mut matched: Vec<(String, Value)> = collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, data)| query.matches(data))
                    .map(|(id, data)| (id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default();
        query.order_and_limit(&mut matched);
        Ok(matched.into_iter().map(|(id, data)| Document { id, data }).collect())
    }

    async fn create(&self, collection: &str, data: Value) -> Result<DocId> {
        let id = Uuid::new_v4().to_string();
        {
            let mut collections = self.collections.write().expect("collections lock poisoned");
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.clone(), data.clone());
        }
        self.emit(collection, &id, Change::Created(data));
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        let existed = {
            let mut collections = self.collections.write().expect("collections lock poisoned");
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), data.clone())
                .is_some()
        };
        let change = if existed { Change::Updated(data) } else { Change::Created(data) };
        self.emit(collection, id, change);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let merged = {
            let mut collections = self.collections.write().expect("collections lock poisoned");
            let docs = collections.get_mut(collection).ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
            let doc = docs.get_mut(id).ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
            merge_patch(doc, patch);
            doc.clone()
        };
        self.emit(collection, id, Change::Updated(merged));
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let removed = {
            let mut collections = self.collections.write().expect("collections lock poisoned");
            collections
                .get_mut(collection)
                .map(|docs| docs.remove(id).is_some())
                .unwrap_or(false)
        };
        // Deleting a missing document is a no-op, matching the hosted store.
        if removed {
            self.emit(collection, id, Change::Deleted);
        }
        Ok(())
    }

    fn watch(&self, collection: &str) -> broadcast::Receiver<StoreEvent> {
        let mut watchers = self.watchers.lock().expect("watchers lock poisoned");
        watchers
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }
}
