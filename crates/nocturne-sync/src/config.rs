use std::time::Duration;

/// Tunables for the synchronization services. One instance per session,
/// injected at construction — there is deliberately no global config.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Hard cap on stored messages per conversation, enforced by trim.
    pub max_history: usize,
    /// How often the heartbeat writes `lastActive`.
    pub heartbeat_interval: Duration,
    /// How stale `lastActive` may be before a user reads as offline. Kept
    /// much looser than the heartbeat period to absorb missed beats.
    pub presence_stale_after: Duration,
    /// Watermark poller period; an extra poll runs immediately on start and
    /// on tab-visible resume.
    pub poll_interval: Duration,
    /// How many notification documents one feed read fetches.
    pub notification_fetch: usize,
    /// How many of those (newest first) the feed exposes.
    pub notification_display: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_history: 20,
            heartbeat_interval: Duration::from_secs(20),
            presence_stale_after: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(2 * 60),
            notification_fetch: 80,
            notification_display: 50,
        }
    }
}
