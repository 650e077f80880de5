//! Notification feed tuning.

use std::time::Duration;

use serde::Deserialize;

use crate::activity::DEFAULT_MAX_AGGREGATED_ACTIVITIES;

/// Default number of visible groups per feed.
pub const DEFAULT_MAX_LENGTH: usize = 99;
/// Default number of recent groups considered when merging new activities.
pub const DEFAULT_MERGE_MAX_LENGTH: usize = 20;
/// Default lease lifetime for the per-user feed lock.
pub const DEFAULT_LOCK_TTL_MS: u64 = 2_000;
/// Default bound on waiting for the per-user feed lock.
pub const DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS: u64 = 3_000;
/// Default prefix for feed, count and lock keys.
pub const DEFAULT_KEY_PREFIX: &str = "notification_feed:1";

/// Which aggregator groups incoming activities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorType {
    /// Group by verb, object and day.
    #[default]
    Notification,
    /// Group by verb and day.
    RecentVerb,
}

/// Feed configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Prefix of every per-user key.
    pub key_prefix: String,
    /// Groups visible for counting and mark-all.
    pub max_length: usize,
    /// Recent groups that new activities may merge into.
    pub merge_max_length: usize,
    /// Activities retained inside one group.
    pub max_aggregated_activities: usize,
    /// Lease lifetime of the feed lock, in milliseconds.
    pub lock_ttl_ms: u64,
    /// Maximum wait for the feed lock, in milliseconds.
    pub lock_acquire_timeout_ms: u64,
    /// Aggregation strategy.
    pub aggregator: AggregatorType,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_length: DEFAULT_MAX_LENGTH,
            merge_max_length: DEFAULT_MERGE_MAX_LENGTH,
            max_aggregated_activities: DEFAULT_MAX_AGGREGATED_ACTIVITIES,
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            lock_acquire_timeout_ms: DEFAULT_LOCK_ACQUIRE_TIMEOUT_MS,
            aggregator: AggregatorType::Notification,
        }
    }
}

impl FeedConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }
}
