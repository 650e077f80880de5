//! In-memory storage implementations.
//!
//! Used by the standalone profile and as test doubles. Both stores expose
//! fault injection toggles and operation counters so tests can assert on
//! what the engine did, not only on the resulting state.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CountStore, Result, StorageError, TimelineStore};
use crate::activity::AggregatedActivity;
use crate::aggregator::rank_by_recency;

/// Counters of structural operations performed on a [`MockTimelineStore`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimelineStats {
    pub add_calls: usize,
    pub remove_calls: usize,
    pub groups_added: usize,
    pub groups_removed: usize,
    pub trim_calls: usize,
    pub groups_trimmed: usize,
}

/// Mock timeline store that keeps groups in memory.
///
/// Entries are kept as a list ranked like the Redis sorted set, with one
/// entry per group key: adding a group whose key is already present replaces
/// the stored snapshot.
#[derive(Default)]
pub struct MockTimelineStore {
    timelines: RwLock<HashMap<String, Vec<AggregatedActivity>>>,
    stats: RwLock<TimelineStats>,
    fail_on_add: RwLock<bool>,
    fail_on_remove: RwLock<bool>,
    fail_on_get: RwLock<bool>,
}

impl MockTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_add(&self, fail: bool) {
        *self.fail_on_add.write().await = fail;
    }

    pub async fn set_fail_on_remove(&self, fail: bool) {
        *self.fail_on_remove.write().await = fail;
    }

    pub async fn set_fail_on_get(&self, fail: bool) {
        *self.fail_on_get.write().await = fail;
    }

    /// Insert groups without touching the operation counters.
    pub async fn seed(&self, key: &str, groups: Vec<AggregatedActivity>) {
        let mut timelines = self.timelines.write().await;
        let timeline = timelines.entry(key.to_string()).or_default();
        timeline.retain(|stored| !groups.iter().any(|g| g.group == stored.group));
        timeline.extend(groups);
        *timeline = rank_by_recency(std::mem::take(timeline));
    }

    /// Every stored entry under `key`, in timeline order.
    pub async fn groups(&self, key: &str) -> Vec<AggregatedActivity> {
        self.timelines
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> TimelineStats {
        *self.stats.read().await
    }

    pub async fn reset_stats(&self) {
        *self.stats.write().await = TimelineStats::default();
    }
}

#[async_trait]
impl TimelineStore for MockTimelineStore {
    async fn get_slice(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<AggregatedActivity>> {
        if *self.fail_on_get.read().await {
            return Err(StorageError::Unavailable("Mock get failure".to_string()));
        }
        let timelines = self.timelines.read().await;
        let Some(timeline) = timelines.get(key) else {
            return Ok(Vec::new());
        };
        let stop = stop.min(timeline.len());
        if start >= stop {
            return Ok(Vec::new());
        }
        Ok(timeline[start..stop].to_vec())
    }

    async fn get_many(
        &self,
        key: &str,
        group_keys: &[String],
    ) -> Result<Vec<AggregatedActivity>> {
        if *self.fail_on_get.read().await {
            return Err(StorageError::Unavailable("Mock get failure".to_string()));
        }
        Ok(self
            .timelines
            .read()
            .await
            .get(key)
            .map(|timeline| {
                timeline
                    .iter()
                    .filter(|g| group_keys.contains(&g.group))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_many(&self, key: &str, groups: Vec<AggregatedActivity>) -> Result<()> {
        if *self.fail_on_add.read().await {
            return Err(StorageError::Unavailable("Mock add failure".to_string()));
        }
        {
            let mut stats = self.stats.write().await;
            stats.add_calls += 1;
            stats.groups_added += groups.len();
        }
        self.seed(key, groups).await;
        Ok(())
    }

    async fn remove_many(&self, key: &str, groups: &[AggregatedActivity]) -> Result<()> {
        if *self.fail_on_remove.read().await {
            return Err(StorageError::Unavailable("Mock remove failure".to_string()));
        }
        let mut timelines = self.timelines.write().await;
        let removed = match timelines.get_mut(key) {
            Some(timeline) => {
                let before = timeline.len();
                timeline.retain(|stored| !groups.iter().any(|g| g.group == stored.group));
                before - timeline.len()
            }
            None => 0,
        };

        let mut stats = self.stats.write().await;
        stats.remove_calls += 1;
        stats.groups_removed += removed;
        Ok(())
    }

    async fn count(&self, key: &str) -> Result<usize> {
        if *self.fail_on_get.read().await {
            return Err(StorageError::Unavailable("Mock get failure".to_string()));
        }
        Ok(self
            .timelines
            .read()
            .await
            .get(key)
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn trim(&self, key: &str, length: usize) -> Result<()> {
        if *self.fail_on_remove.read().await {
            return Err(StorageError::Unavailable("Mock trim failure".to_string()));
        }
        let mut timelines = self.timelines.write().await;
        let trimmed = match timelines.get_mut(key) {
            Some(timeline) => {
                let before = timeline.len();
                timeline.truncate(length);
                before - timeline.len()
            }
            None => 0,
        };

        let mut stats = self.stats.write().await;
        stats.trim_calls += 1;
        stats.groups_trimmed += trimmed;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if *self.fail_on_remove.read().await {
            return Err(StorageError::Unavailable("Mock remove failure".to_string()));
        }
        self.timelines.write().await.remove(key);
        Ok(())
    }
}

/// Mock count store that keeps counts in memory.
#[derive(Default)]
pub struct MockCountStore {
    counts: RwLock<HashMap<String, u64>>,
    writes: RwLock<usize>,
    fail_on_get: RwLock<bool>,
    fail_on_set: RwLock<bool>,
}

impl MockCountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_get(&self, fail: bool) {
        *self.fail_on_get.write().await = fail;
    }

    pub async fn set_fail_on_set(&self, fail: bool) {
        *self.fail_on_set.write().await = fail;
    }

    /// Store a value without counting it as a write.
    pub async fn seed(&self, key: &str, count: u64) {
        self.counts.write().await.insert(key.to_string(), count);
    }

    /// Number of successful `set` calls.
    pub async fn write_count(&self) -> usize {
        *self.writes.read().await
    }
}

#[async_trait]
impl CountStore for MockCountStore {
    async fn get(&self, key: &str) -> Result<Option<u64>> {
        if *self.fail_on_get.read().await {
            return Err(StorageError::Unavailable("Mock get failure".to_string()));
        }
        Ok(self.counts.read().await.get(key).copied())
    }

    async fn set(&self, key: &str, count: u64) -> Result<()> {
        if *self.fail_on_set.read().await {
            return Err(StorageError::Unavailable("Mock set failure".to_string()));
        }
        self.counts.write().await.insert(key.to_string(), count);
        *self.writes.write().await += 1;
        Ok(())
    }
}
