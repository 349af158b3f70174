//! Real-time synchronization core: status effects, presence, rolling chat
//! history, follower registry, notification fan-out, and watermark polling,
//! all over a generic reactive document store.
//!
//! Nothing here is a server. Every client process runs these services against
//! the shared store; all operations are idempotent and order-tolerant because
//! no ordering or mutual exclusion exists between clients.

pub mod config;
pub mod effects;
pub mod error;
pub mod fanout;
pub mod follows;
pub mod history;
pub mod notifications;
pub mod paths;
pub mod poller;
pub mod presence;
pub(crate) mod records;
pub mod session;
pub mod topics;

pub use config::SyncConfig;
pub use effects::EffectStore;
pub use error::{Result, SyncError};
pub use fanout::FanoutEngine;
pub use follows::{FollowerRegistry, IndexedRegistry, ScanRegistry};
pub use history::{ChatHistory, conversation_key};
pub use notifications::{NotificationFeed, NotificationGroup};
pub use poller::WatermarkPoller;
pub use presence::PresenceTracker;
pub use session::Session;
pub use topics::TopicService;
