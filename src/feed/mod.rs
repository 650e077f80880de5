//! Per-user notification feeds.
//!
//! A [`NotificationFeed`] owns no state beyond its derived keys. Every
//! mutation runs inside the user's feed lock and ends with a recount of the
//! visible window: the denormalized unseen count is rewritten, and published,
//! only when it changed.
//!
//! Collaborators are injected through a [`FeedBackend`]:
//! - `TimelineStore`: aggregated groups per feed key
//! - `CountStore` + `Notifier`: wrapped by [`CountCache`]
//! - `FeedLock`: per-user lease
//! - `Aggregator`: grouping and ranking

use std::time::Duration;

use crate::config::{
    FeedConfig, DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS, DEFAULT_LOCK_TTL_MS, DEFAULT_MAX_LENGTH,
    DEFAULT_MERGE_MAX_LENGTH,
};
use crate::lock::LockError;
use crate::storage::StorageError;

mod backend;
mod count;
mod keys;
mod notification;

pub use backend::FeedBackend;
pub use count::CountCache;
pub use keys::FeedKeys;
pub use notification::NotificationFeed;

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

/// Errors returned by feed operations.
///
/// Publish failures are never surfaced here; they are logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Feed lock contention on {key}: not acquired within {waited:?}")]
    LockContention { key: String, waited: Duration },

    #[error("Feed lease on {key} expired before the count was written")]
    LeaseLost { key: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lock error: {0}")]
    Lock(LockError),
}

impl From<LockError> for FeedError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Contention { key, waited } => Self::LockContention { key, waited },
            other => Self::Lock(other),
        }
    }
}

/// Sizing and locking parameters shared by every feed of a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Groups visible for counting and mark-all.
    pub max_length: usize,
    /// Recent groups that new activities may merge into.
    pub merge_max_length: usize,
    /// Lease lifetime of the feed lock.
    pub lock_ttl: Duration,
    /// Maximum wait for the feed lock.
    pub lock_acquire_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            merge_max_length: DEFAULT_MERGE_MAX_LENGTH,
            lock_ttl: Duration::from_millis(DEFAULT_LOCK_TTL_MS),
            lock_acquire_timeout: Duration::from_millis(DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS),
        }
    }
}

impl From<&FeedConfig> for FeedSettings {
    fn from(config: &FeedConfig) -> Self {
        Self {
            max_length: config.max_length,
            merge_max_length: config.merge_max_length,
            lock_ttl: config.lock_ttl(),
            lock_acquire_timeout: config.lock_acquire_timeout(),
        }
    }
}

#[cfg(test)]
mod tests;
