//! Storage for notification feeds.
//!
//! This module contains:
//! - `TimelineStore` trait: ordered aggregated groups per feed key
//! - `CountStore` trait: the denormalized unseen count per user
//! - Implementations: Mock (in-memory), Redis

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::activity::AggregatedActivity;
use crate::config::{StorageConfig, StorageType};

pub mod mock;
#[cfg(feature = "redis")]
pub mod redis;

pub use mock::{MockCountStore, MockTimelineStore};
#[cfg(feature = "redis")]
pub use self::redis::{RedisCountStore, RedisTimelineStore};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown storage backend: {0}")]
    UnknownBackend(String),
}

/// Ordered storage of aggregated groups.
///
/// Entries under one key are ordered most recent first and identified by
/// their group key. Recency is `updated_at` at millisecond precision; equal
/// instants order by group key descending (the sorted set reverse range
/// order). At most one entry exists per group key. Replacing a group means
/// removing the old snapshot, then adding the new one.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// Read groups in positions `[start, stop)`.
    async fn get_slice(&self, key: &str, start: usize, stop: usize)
        -> Result<Vec<AggregatedActivity>>;

    /// Stored snapshots for `group_keys`, wherever they are ranked.
    ///
    /// Keys with no stored group are skipped.
    async fn get_many(&self, key: &str, group_keys: &[String])
        -> Result<Vec<AggregatedActivity>>;

    /// Insert groups. A group whose key is already stored replaces it.
    async fn add_many(&self, key: &str, groups: Vec<AggregatedActivity>) -> Result<()>;

    /// Remove groups by identity.
    async fn remove_many(&self, key: &str, groups: &[AggregatedActivity]) -> Result<()>;

    /// Number of groups stored under `key`.
    async fn count(&self, key: &str) -> Result<usize>;

    /// Keep only the `length` most recent groups.
    async fn trim(&self, key: &str, length: usize) -> Result<()>;

    /// Drop every group stored under `key`.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Storage for a denormalized counter.
///
/// Values must be visible to the next `get` as soon as `set` returns.
#[async_trait]
pub trait CountStore: Send + Sync {
    /// Stored count, or `None` if the key was never written.
    async fn get(&self, key: &str) -> Result<Option<u64>>;

    /// Overwrite the stored count.
    async fn set(&self, key: &str, count: u64) -> Result<()>;
}

/// Initialize storage based on configuration.
///
/// Returns the (TimelineStore, CountStore) pair for the configured backend.
pub async fn init_storage(
    config: &StorageConfig,
) -> Result<(Arc<dyn TimelineStore>, Arc<dyn CountStore>)> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: in-memory");
            Ok((
                Arc::new(MockTimelineStore::new()),
                Arc::new(MockCountStore::new()),
            ))
        }
        #[cfg(feature = "redis")]
        StorageType::Redis => {
            info!(url = %config.redis.url, "Storage: redis");
            let timeline = RedisTimelineStore::new(&config.redis.url).await?;
            let counts = RedisCountStore::new(&config.redis.url).await?;
            Ok((Arc::new(timeline), Arc::new(counts)))
        }
        #[cfg(not(feature = "redis"))]
        StorageType::Redis => {
            tracing::error!("Redis storage requested but 'redis' feature is not enabled");
            Err(StorageError::UnknownBackend("redis".to_string()))
        }
    }
}
