use thiserror::Error;

/// Foreground operations surface exactly one of these to the caller.
/// Background loops (heartbeat, trim, fan-out per recipient, poll cycles)
/// never propagate past their own boundary — they log and let the next
/// scheduled cycle retry.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] nocturne_store::StoreError),

    #[error("user not found: {0}")]
    UnknownUser(String),

    #[error("topic not found: {0}")]
    UnknownTopic(String),

    #[error("corrupt record in {collection}: {source}")]
    Decode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SyncError>;

pub(crate) fn decode_err(collection: &str, source: serde_json::Error) -> SyncError {
    SyncError::Decode { collection: collection.to_string(), source }
}
