use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::{
    Change, DocId, Document, DocumentStore, Query, Result, StoreError, StoreEvent, merge_patch,
};

/// SQLite-backed document store for single-process deployments.
///
/// Documents are JSON blobs in one table keyed by (collection, id). Query
/// filtering reuses the same in-memory matcher as `MemoryStore` — this
/// backend is for small deployments, not an indexing engine.
pub struct SqliteStore {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Mutex<Connection>,
    watchers: Mutex<HashMap<String, broadcast::Sender<StoreEvent>>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )",
            [],
        )?;

        info!("Document store opened at {}", path.display());
        Ok(SqliteStore {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                watchers: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Run blocking SQLite work off the async runtime.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner
                .conn
                .lock()
                .map_err(|e| StoreError::Backend(anyhow!("connection lock poisoned: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Backend(anyhow!("spawn_blocking join error: {e}")))?
    }

    fn emit(&self, collection: &str, id: &str, change: Change) {
        let watchers = self.inner.watchers.lock().expect("watchers lock poisoned");
        if let Some(tx) = watchers.get(collection) {
            let _ = tx.send(StoreEvent {
                collection: collection.to_string(),
                id: id.to_string(),
                change,
            });
        }
    }
}

fn parse_doc(collection: &str, raw: String) -> Result<Value> {
    serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
        collection: collection.to_string(),
        source,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                    [&collection, &id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::Backend(e.into()))?;
            raw.map(|raw| {
                Ok(Document { id: id.clone(), data: parse_doc(&collection, raw)? })
            })
            .transpose()
        })
        .await
    }

    async fn query(&self, query: Query) -> Result<Vec<Document>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id, data FROM documents WHERE collection = ?1")
                .map_err(|e| StoreError::Backend(e.into()))?;
            let rows = stmt
                .query_map([&query.collection], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| StoreError::Backend(e.into()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Backend(e.into()))?;

            let mut matched = Vec::new();
            for (id, raw) in rows {
                let data = parse_doc(&query.collection, raw)?;
                if query.matches(&data) {
                    matched.push((id, data));
                }
            }
            query.order_and_limit(&mut matched);
            Ok(matched.into_iter().map(|(id, data)| Document { id, data }).collect())
        })
        .await
    }

    async fn create(&self, collection: &str, data: Value) -> Result<DocId> {
        let id = Uuid::new_v4().to_string();
        let raw = data.to_string();
        let (coll, doc_id) = (collection.to_string(), id.clone());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
                [&coll, &doc_id, &raw],
            )
            .map_err(|e| StoreError::Backend(e.into()))?;
            Ok(())
        })
        .await?;
        self.emit(collection, &id, Change::Created(data));
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        let raw = data.to_string();
        let (coll, doc_id) = (collection.to_string(), id.to_string());
        let existed = self
            .with_conn(move |conn| {
                let existed: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM documents WHERE collection = ?1 AND id = ?2",
                        [&coll, &doc_id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| StoreError::Backend(e.into()))?;
                conn.execute(
                    "INSERT OR REPLACE INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
                    [&coll, &doc_id, &raw],
                )
                .map_err(|e| StoreError::Backend(e.into()))?;
                Ok(existed.is_some())
            })
            .await?;
        let change = if existed { Change::Updated(data) } else { Change::Created(data) };
        self.emit(collection, id, change);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        let (coll, doc_id) = (collection.to_string(), id.to_string());
        let merged = self
            .with_conn(move |conn| {
                let raw: Option<String> = conn
                    .query_row(
                        "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                        [&coll, &doc_id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(|e| StoreError::Backend(e.into()))?;
                let raw = raw.ok_or_else(|| StoreError::NotFound {
                    collection: coll.clone(),
                    id: doc_id.clone(),
                })?;
                let mut doc = parse_doc(&coll, raw)?;
                merge_patch(&mut doc, patch);
                conn.execute(
                    "UPDATE documents SET data = ?3 WHERE collection = ?1 AND id = ?2",
                    [&coll, &doc_id, &doc.to_string()],
                )
                .map_err(|e| StoreError::Backend(e.into()))?;
                Ok(doc)
            })
            .await?;
        self.emit(collection, id, Change::Updated(merged));
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let (coll, doc_id) = (collection.to_string(), id.to_string());
        let removed = self
            .with_conn(move |conn| {
                let n = conn
                    .execute(
                        "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                        [&coll, &doc_id],
                    )
                    .map_err(|e| StoreError::Backend(e.into()))?;
                Ok(n > 0)
            })
            .await?;
        if removed {
            self.emit(collection, id, Change::Deleted);
        }
        Ok(())
    }

    fn watch(&self, collection: &str) -> broadcast::Receiver<StoreEvent> {
        let mut watchers = self.inner.watchers.lock().expect("watchers lock poisoned");
        watchers
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }
}
