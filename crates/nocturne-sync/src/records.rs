//! Decoding stored documents into typed records.

use nocturne_store::{Document, DocumentStore};
use nocturne_types::{Message, NewsItem, Notification, Post, Topic, UserRecord};
use serde::de::DeserializeOwned;

use crate::error::{Result, SyncError, decode_err};
use crate::paths;

/// Records that carry their document id outside the stored data.
pub(crate) trait FromDoc: DeserializeOwned {
    fn set_id(&mut self, id: String);
}

macro_rules! from_doc {
    ($($ty:ty),* $(,)?) => {
        $(impl FromDoc for $ty {
            fn set_id(&mut self, id: String) {
                self.id = id;
            }
        })*
    };
}

from_doc!(UserRecord, Message, Notification, Topic, Post, NewsItem);

pub(crate) fn decode<T: FromDoc>(collection: &str, doc: Document) -> Result<T> {
    let mut record: T = serde_json::from_value(doc.data).map_err(|e| decode_err(collection, e))?;
    record.set_id(doc.id);
    Ok(record)
}

pub(crate) async fn load_user(store: &dyn DocumentStore, user_id: &str) -> Result<UserRecord> {
    let doc = store
        .get(paths::USERS, user_id)
        .await?
        .ok_or_else(|| SyncError::UnknownUser(user_id.to_string()))?;
    decode(paths::USERS, doc)
}
