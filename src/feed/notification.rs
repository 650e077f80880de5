//! The notification feed engine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::{CountCache, FeedBackend, FeedError, FeedKeys, FeedSettings, Result};
use crate::activity::{Activity, AggregatedActivity, GroupTransition};
use crate::aggregator::Aggregator;
use crate::lock::{with_lock, FeedLock, Lease};
use crate::storage::TimelineStore;

/// One user's notification feed.
///
/// Cheap to construct; build one per request with [`FeedBackend::feed`].
pub struct NotificationFeed {
    user_id: String,
    keys: FeedKeys,
    settings: FeedSettings,
    timeline: Arc<dyn TimelineStore>,
    lock: Arc<dyn FeedLock>,
    aggregator: Arc<dyn Aggregator>,
    cache: CountCache,
}

impl NotificationFeed {
    pub fn new(backend: &FeedBackend, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let keys = FeedKeys::new(&backend.key_prefix, &user_id);
        let cache = CountCache::new(
            Arc::clone(&backend.counts),
            Arc::clone(&backend.notifier),
            keys.count(),
            keys.pubsub_channel(),
        );
        Self {
            user_id,
            keys,
            settings: backend.settings.clone(),
            timeline: Arc::clone(&backend.timeline),
            lock: Arc::clone(&backend.lock),
            aggregator: Arc::clone(&backend.aggregator),
            cache,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn keys(&self) -> &FeedKeys {
        &self.keys
    }

    pub fn max_length(&self) -> usize {
        self.settings.max_length
    }

    /// Aggregate `activities` into the feed.
    ///
    /// Returns the new and updated groups, most recent first. The count is
    /// recomputed over the whole visible window afterwards.
    #[tracing::instrument(
        name = "feed.add_many",
        skip_all,
        fields(user_id = %self.user_id, activities = activities.len())
    )]
    pub async fn add_many(&self, activities: Vec<Activity>) -> Result<Vec<AggregatedActivity>> {
        self.locked(|lease| async move { self.add_many_locked(activities, &lease).await })
            .await
    }

    async fn add_many_locked(
        &self,
        activities: Vec<Activity>,
        lease: &Lease,
    ) -> Result<Vec<AggregatedActivity>> {
        let feed_key = self.keys.feed();
        let mut candidates = self
            .timeline
            .get_slice(feed_key, 0, self.settings.merge_max_length)
            .await?;

        // Groups ranked past the merge window keep their identity
        let mut outside: Vec<String> = activities
            .iter()
            .map(|a| self.aggregator.group_key(a))
            .filter(|key| !candidates.iter().any(|g| &g.group == key))
            .collect();
        outside.sort_unstable();
        outside.dedup();
        if !outside.is_empty() {
            candidates.extend(self.timeline.get_many(feed_key, &outside).await?);
        }

        let outcome = self.aggregator.merge(&candidates, activities);

        if !outcome.is_empty() {
            let to_remove = outcome.to_remove();
            if !to_remove.is_empty() {
                self.timeline.remove_many(feed_key, &to_remove).await?;
            }
            self.timeline.add_many(feed_key, outcome.to_add()).await?;
            self.timeline.trim(feed_key, self.settings.max_length).await?;
            debug!(
                new = outcome.new.len(),
                changed = outcome.changed.len(),
                "Merged activities into feed"
            );
        }

        let window = self.visible_window().await?;
        self.recount(window, Some(lease)).await?;

        Ok(self.aggregator.rank(outcome.to_add()))
    }

    /// Read groups in positions `[start, stop)`.
    pub async fn get_slice(&self, start: usize, stop: usize) -> Result<Vec<AggregatedActivity>> {
        Ok(self.timeline.get_slice(self.keys.feed(), start, stop).await?)
    }

    /// Stored unseen count. Never recomputes.
    pub async fn get_denormalized_count(&self) -> Result<u64> {
        Ok(self.cache.get().await?)
    }

    /// Store and publish `count` unconditionally.
    pub async fn set_denormalized_count(&self, count: u64) -> Result<()> {
        Ok(self.cache.set(count).await?)
    }

    /// Publish `count` without storing it.
    pub async fn publish_count(&self, count: u64) {
        self.cache.publish(count).await
    }

    /// Count unseen groups among the first `max_length` of `groups` by rank,
    /// and store and publish the result if it differs from the stored count.
    ///
    /// Returns the computed count whether or not it was written.
    pub async fn denormalize_count(&self, groups: Vec<AggregatedActivity>) -> Result<u64> {
        self.recount(groups, None).await
    }

    /// Number of unseen groups in `groups`, or in the visible window if `None`.
    pub async fn count_unseen(&self, groups: Option<&[AggregatedActivity]>) -> Result<u64> {
        let count = match groups {
            Some(groups) => unseen(groups.iter()),
            None => unseen(self.visible_window().await?.iter()),
        };
        Ok(count)
    }

    /// Stamp every visible group as seen and/or read.
    ///
    /// Only groups whose state changes are replaced in the timeline. Returns
    /// the visible groups as they were before marking.
    #[tracing::instrument(
        name = "feed.mark_all",
        skip_all,
        fields(user_id = %self.user_id, seen = seen, read = read)
    )]
    pub async fn mark_all(&self, seen: bool, read: bool) -> Result<Vec<AggregatedActivity>> {
        self.locked(|lease| async move { self.mark_all_locked(seen, read, &lease).await })
            .await
    }

    async fn mark_all_locked(
        &self,
        seen: bool,
        read: bool,
        lease: &Lease,
    ) -> Result<Vec<AggregatedActivity>> {
        let groups = self.visible_window().await?;
        let transitions = mark_transitions(&groups, seen, read);

        if !transitions.is_empty() {
            let feed_key = self.keys.feed();
            let old: Vec<AggregatedActivity> = transitions.iter().map(|t| t.old.clone()).collect();
            let new: Vec<AggregatedActivity> = transitions.iter().map(|t| t.new.clone()).collect();

            self.timeline.remove_many(feed_key, &old).await?;
            self.timeline.add_many(feed_key, new).await?;
            debug!(transitions = transitions.len(), "Replaced marked groups");
        }

        let replaced: HashMap<&str, &AggregatedActivity> =
            transitions.iter().map(|t| (t.group(), &t.new)).collect();
        let window: Vec<AggregatedActivity> = groups
            .iter()
            .map(|g| {
                replaced
                    .get(g.group.as_str())
                    .map(|new| (*new).clone())
                    .unwrap_or_else(|| g.clone())
            })
            .collect();
        self.recount(window, Some(lease)).await?;

        Ok(groups)
    }

    /// Recompute the count from the current visible window.
    #[tracing::instrument(name = "feed.refresh_count", skip_all, fields(user_id = %self.user_id))]
    pub async fn refresh_count(&self) -> Result<u64> {
        self.locked(|lease| async move {
            let window = self.visible_window().await?;
            self.recount(window, Some(&lease)).await
        })
        .await
    }

    /// Drop every group of the feed. The count becomes zero.
    #[tracing::instrument(name = "feed.clear", skip_all, fields(user_id = %self.user_id))]
    pub async fn clear(&self) -> Result<()> {
        self.locked(|lease| async move {
            self.timeline.delete(self.keys.feed()).await?;
            self.recount(Vec::new(), Some(&lease)).await?;
            Ok(())
        })
        .await
    }

    async fn locked<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Lease) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        with_lock(
            Arc::clone(&self.lock),
            self.keys.lock(),
            self.settings.lock_ttl,
            self.settings.lock_acquire_timeout,
            f,
        )
        .await
    }

    async fn visible_window(&self) -> Result<Vec<AggregatedActivity>> {
        self.get_slice(0, self.settings.max_length).await
    }

    /// The single path through which the stored count changes.
    ///
    /// Inside a critical section the lease is re-checked before writing.
    async fn recount(&self, groups: Vec<AggregatedActivity>, lease: Option<&Lease>) -> Result<u64> {
        let ranked = self.aggregator.rank(groups);
        let count = unseen(ranked.iter().take(self.settings.max_length));

        let stored = self.cache.get().await?;
        if count == stored {
            debug!(count = count, "Count unchanged");
            return Ok(count);
        }

        if let Some(lease) = lease {
            if !self.lock.is_held(lease).await? {
                warn!(
                    key = %lease.key(),
                    count = count,
                    "Feed lease lost before count write, skipping"
                );
                return Err(FeedError::LeaseLost {
                    key: lease.key().to_string(),
                });
            }
        }

        self.cache.set(count).await?;
        debug!(previous = stored, count = count, "Count updated");
        Ok(count)
    }
}

fn unseen<'a>(groups: impl Iterator<Item = &'a AggregatedActivity>) -> u64 {
    groups.filter(|g| !g.is_seen()).count() as u64
}

/// Old/new pairs for every group whose stamps change.
fn mark_transitions(groups: &[AggregatedActivity], seen: bool, read: bool) -> Vec<GroupTransition> {
    let now = Utc::now();
    groups
        .iter()
        .filter_map(|old| {
            let mut new = old.clone();
            let mut changed = false;
            if seen {
                changed |= new.mark_seen(now);
            }
            if read {
                changed |= new.mark_read(now);
            }
            changed.then(|| GroupTransition {
                old: old.clone(),
                new,
            })
        })
        .collect()
}
