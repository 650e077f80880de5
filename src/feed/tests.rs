use super::*;
use crate::activity::{Activity, AggregatedActivity};
use crate::aggregator::NotificationAggregator;
use crate::bus::MockNotifier;
use crate::config::Config;
use crate::lock::{FeedLock, InProcessFeedLock, Lease};
use crate::storage::mock::TimelineStats;
use crate::storage::{CountStore, MockCountStore, MockTimelineStore, TimelineStore};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

const USER: &str = "1";
const FEED_KEY: &str = "notification_feed:1:user:1";
const COUNT_KEY: &str = "notification_feed:1:user:1:count";

fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

fn like(actor: u64, object: u64, minute: i64) -> Activity {
    Activity::new(actor, "like", object, at(minute))
}

fn group(name: &str, minute: i64, seen: bool) -> AggregatedActivity {
    let mut group = AggregatedActivity::new(name, at(minute));
    group.append(like(1, minute as u64, minute), 15);
    if seen {
        group.mark_seen(at(minute + 1));
    }
    group
}

struct Harness {
    backend: FeedBackend,
    timeline: Arc<MockTimelineStore>,
    counts: Arc<MockCountStore>,
    notifier: Arc<MockNotifier>,
    lock: Arc<InProcessFeedLock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(FeedSettings::default())
    }

    fn with_settings(settings: FeedSettings) -> Self {
        let timeline = Arc::new(MockTimelineStore::new());
        let counts = Arc::new(MockCountStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let lock = Arc::new(InProcessFeedLock::new());
        let backend = FeedBackend::new(
            timeline.clone(),
            counts.clone(),
            lock.clone(),
            notifier.clone(),
            Arc::new(NotificationAggregator::default()),
        )
        .with_settings(settings);
        Self {
            backend,
            timeline,
            counts,
            notifier,
            lock,
        }
    }

    fn feed(&self) -> NotificationFeed {
        self.backend.feed(USER)
    }

    async fn stored_count(&self) -> Option<u64> {
        self.counts.get(COUNT_KEY).await.unwrap()
    }
}

// ============================================================================
// Counting scenarios
// ============================================================================

#[tokio::test]
async fn test_add_many_on_empty_feed_publishes_once() {
    let h = Harness::new();
    let feed = h.feed();

    let groups = feed
        .add_many(vec![like(7, 100, 0), like(8, 200, 1)])
        .await
        .unwrap();

    assert_eq!(groups.len(), 2);
    assert_eq!(h.stored_count().await, Some(2));

    let published = h.notifier.take_published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].channel, USER);
    assert_eq!(published[0].data, r#"{"unread_count": 2, "unseen_count": 2}"#);
}

#[tokio::test]
async fn test_mark_all_seen_clears_count() {
    let h = Harness::new();
    h.timeline
        .seed(
            FEED_KEY,
            vec![group("a", 1, false), group("b", 2, false), group("c", 3, false)],
        )
        .await;
    h.counts.seed(COUNT_KEY, 3).await;

    let before = h.feed().mark_all(true, false).await.unwrap();

    assert_eq!(before.len(), 3);
    assert!(before.iter().all(|g| !g.is_seen()));
    assert_eq!(h.stored_count().await, Some(0));
    assert_eq!(h.notifier.published_counts().await, vec![0]);

    let stats = h.timeline.stats().await;
    assert_eq!(stats.remove_calls, 1);
    assert_eq!(stats.add_calls, 1);
    assert_eq!(stats.groups_removed, 3);
    assert_eq!(stats.groups_added, 3);
    assert_eq!(h.timeline.count(FEED_KEY).await.unwrap(), 3);
}

#[tokio::test]
async fn test_mark_all_only_replaces_changed_groups() {
    let h = Harness::new();
    h.timeline
        .seed(FEED_KEY, vec![group("unseen", 1, false), group("seen", 2, true)])
        .await;
    h.counts.seed(COUNT_KEY, 1).await;

    h.feed().mark_all(true, false).await.unwrap();

    let stats = h.timeline.stats().await;
    assert_eq!(stats.groups_removed, 1);
    assert_eq!(stats.groups_added, 1);
    assert_eq!(h.stored_count().await, Some(0));
    assert_eq!(h.notifier.published_counts().await, vec![0]);

    // The untouched group keeps its original stamp
    let stored = h.timeline.groups(FEED_KEY).await;
    let seen = stored.iter().find(|g| g.group == "seen").unwrap();
    assert_eq!(seen.seen_at, Some(at(3)));
}

#[tokio::test]
async fn test_mark_all_on_fully_seen_feed_is_a_no_op() {
    let h = Harness::new();
    h.timeline
        .seed(FEED_KEY, vec![group("a", 1, true), group("b", 2, true)])
        .await;
    h.counts.seed(COUNT_KEY, 0).await;

    let before = h.feed().mark_all(true, false).await.unwrap();

    assert_eq!(before.len(), 2);
    assert_eq!(h.timeline.stats().await, TimelineStats::default());
    assert_eq!(h.notifier.attempt_count().await, 0);
    assert_eq!(h.counts.write_count().await, 0);
}

#[tokio::test]
async fn test_second_mark_all_performs_no_replacement() {
    let h = Harness::new();
    h.timeline
        .seed(FEED_KEY, vec![group("a", 1, false), group("b", 2, false)])
        .await;
    let feed = h.feed();

    feed.mark_all(true, false).await.unwrap();
    h.timeline.reset_stats().await;
    h.notifier.take_published().await;

    feed.mark_all(true, false).await.unwrap();

    assert_eq!(h.timeline.stats().await, TimelineStats::default());
    assert_eq!(h.notifier.published_count().await, 0);
}

#[tokio::test]
async fn test_mark_all_read_keeps_seen_state_and_count() {
    let h = Harness::new();
    h.timeline
        .seed(FEED_KEY, vec![group("a", 1, false), group("b", 2, true)])
        .await;
    h.counts.seed(COUNT_KEY, 1).await;

    h.feed().mark_all(false, true).await.unwrap();

    let stored = h.timeline.groups(FEED_KEY).await;
    assert!(stored.iter().all(|g| g.is_read()));
    assert_eq!(stored.iter().filter(|g| g.is_seen()).count(), 1);
    assert_eq!(h.timeline.stats().await.groups_added, 2);
    // Still one unseen group: no count write
    assert_eq!(h.stored_count().await, Some(1));
    assert_eq!(h.notifier.attempt_count().await, 0);
}

#[tokio::test]
async fn test_transitions_are_forward_only() {
    let h = Harness::new();
    h.timeline.seed(FEED_KEY, vec![group("a", 1, false)]).await;
    let feed = h.feed();

    feed.mark_all(true, false).await.unwrap();
    let first_seen = h.timeline.groups(FEED_KEY).await[0].seen_at;
    assert!(first_seen.is_some());

    feed.mark_all(true, true).await.unwrap();
    let stored = h.timeline.groups(FEED_KEY).await;
    assert_eq!(stored[0].seen_at, first_seen);
    assert!(stored[0].is_read());
}

// ============================================================================
// Count maintenance
// ============================================================================

#[tokio::test]
async fn test_denormalize_count_publishes_only_on_change() {
    let h = Harness::new();
    let feed = h.feed();
    let groups = vec![group("a", 1, false), group("b", 2, true)];

    assert_eq!(feed.denormalize_count(groups.clone()).await.unwrap(), 1);
    assert_eq!(feed.denormalize_count(groups).await.unwrap(), 1);

    assert_eq!(h.notifier.published_counts().await, vec![1]);
    assert_eq!(h.counts.write_count().await, 1);
}

#[tokio::test]
async fn test_denormalize_count_only_considers_visible_window() {
    let h = Harness::with_settings(FeedSettings {
        max_length: 2,
        ..FeedSettings::default()
    });
    let feed = h.feed();

    // Oldest group is unseen but falls outside the window after ranking
    let count = feed
        .denormalize_count(vec![
            group("old", 1, false),
            group("mid", 2, true),
            group("new", 3, false),
        ])
        .await
        .unwrap();

    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_set_denormalized_count_always_publishes() {
    let h = Harness::new();
    let feed = h.feed();

    feed.set_denormalized_count(4).await.unwrap();
    feed.set_denormalized_count(4).await.unwrap();

    assert_eq!(feed.get_denormalized_count().await.unwrap(), 4);
    assert_eq!(h.notifier.published_counts().await, vec![4, 4]);
}

#[tokio::test]
async fn test_publish_count_does_not_store() {
    let h = Harness::new();
    let feed = h.feed();

    feed.publish_count(9).await;

    assert_eq!(h.stored_count().await, None);
    assert_eq!(h.notifier.published_counts().await, vec![9]);
}

#[tokio::test]
async fn test_get_denormalized_count_never_recomputes() {
    let h = Harness::new();
    h.timeline
        .seed(FEED_KEY, vec![group("a", 1, false), group("b", 2, false)])
        .await;

    assert_eq!(h.feed().get_denormalized_count().await.unwrap(), 0);
    assert_eq!(h.counts.write_count().await, 0);
}

#[tokio::test]
async fn test_count_unseen_is_a_pure_query() {
    let h = Harness::new();
    h.timeline
        .seed(
            FEED_KEY,
            vec![group("a", 1, false), group("b", 2, true), group("c", 3, false)],
        )
        .await;
    let feed = h.feed();

    assert_eq!(feed.count_unseen(None).await.unwrap(), 2);
    let explicit = vec![group("x", 1, false)];
    assert_eq!(feed.count_unseen(Some(&explicit)).await.unwrap(), 1);

    assert_eq!(h.counts.write_count().await, 0);
    assert_eq!(h.notifier.attempt_count().await, 0);
}

#[tokio::test]
async fn test_refresh_count_repairs_drift() {
    let h = Harness::new();
    h.timeline
        .seed(FEED_KEY, vec![group("a", 1, false), group("b", 2, false)])
        .await;
    h.counts.seed(COUNT_KEY, 5).await;

    assert_eq!(h.feed().refresh_count().await.unwrap(), 2);
    assert_eq!(h.stored_count().await, Some(2));
    assert_eq!(h.notifier.published_counts().await, vec![2]);
}

#[tokio::test]
async fn test_get_slice_reads_newest_first() {
    let h = Harness::new();
    h.timeline
        .seed(
            FEED_KEY,
            vec![group("a", 1, false), group("c", 3, true), group("b", 2, false)],
        )
        .await;

    let slice = h.feed().get_slice(0, 2).await.unwrap();
    let names: Vec<&str> = slice.iter().map(|g| g.group.as_str()).collect();
    assert_eq!(names, vec!["c", "b"]);

    assert!(h.feed().get_slice(5, 10).await.unwrap().is_empty());
    assert_eq!(h.counts.write_count().await, 0);
}

#[tokio::test]
async fn test_clear_resets_count() {
    let h = Harness::new();
    h.timeline
        .seed(FEED_KEY, vec![group("a", 1, false), group("b", 2, false)])
        .await;
    h.counts.seed(COUNT_KEY, 2).await;

    h.feed().clear().await.unwrap();

    assert_eq!(h.timeline.count(FEED_KEY).await.unwrap(), 0);
    assert_eq!(h.stored_count().await, Some(0));
    assert_eq!(h.notifier.published_counts().await, vec![0]);
}

// ============================================================================
// Add path
// ============================================================================

#[tokio::test]
async fn test_add_many_merges_into_existing_group() {
    let h = Harness::new();
    let feed = h.feed();

    feed.add_many(vec![like(1, 42, 0)]).await.unwrap();
    let updated = feed.add_many(vec![like(2, 42, 5)]).await.unwrap();

    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].actor_count(), 2);
    assert_eq!(h.timeline.count(FEED_KEY).await.unwrap(), 1);
    // Still one unseen group: only the first add published
    assert_eq!(h.notifier.published_counts().await, vec![1]);
}

#[tokio::test]
async fn test_add_many_keeps_seen_stamp_of_merged_group() {
    let h = Harness::new();
    let feed = h.feed();

    feed.add_many(vec![like(1, 42, 0)]).await.unwrap();
    feed.mark_all(true, false).await.unwrap();
    feed.add_many(vec![like(2, 42, 5)]).await.unwrap();

    let stored = h.timeline.groups(FEED_KEY).await;
    assert_eq!(stored.len(), 1);
    assert!(stored[0].is_seen());
    assert_eq!(feed.get_denormalized_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_add_many_merges_group_beyond_merge_window() {
    let h = Harness::with_settings(FeedSettings {
        merge_max_length: 2,
        ..FeedSettings::default()
    });
    let feed = h.feed();
    feed.add_many(vec![like(1, 1, 1), like(1, 2, 2), like(1, 3, 3)])
        .await
        .unwrap();
    feed.mark_all(true, false).await.unwrap();
    h.timeline.reset_stats().await;

    // Group of object 1 is ranked third, outside the two merge candidates
    let returned = feed.add_many(vec![like(2, 1, 4)]).await.unwrap();

    let stored = h.timeline.groups(FEED_KEY).await;
    let mut keys: Vec<&str> = stored.iter().map(|g| g.group.as_str()).collect();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), 3, "One entry per group key");
    assert_eq!(stored.len(), 3);

    let merged = &stored[0];
    assert_eq!(merged.group, "like-1-2024-03-01");
    assert_eq!(merged.actor_count(), 2);
    assert!(merged.is_seen());
    assert_eq!(h.timeline.stats().await.groups_removed, 1);

    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0].group, "like-1-2024-03-01");
    assert_eq!(feed.get_denormalized_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_add_many_trims_to_max_length() {
    let h = Harness::with_settings(FeedSettings {
        max_length: 3,
        ..FeedSettings::default()
    });
    let feed = h.feed();

    let activities = (0..5).map(|i| like(1, 100 + i, i as i64)).collect();
    feed.add_many(activities).await.unwrap();

    assert_eq!(h.timeline.count(FEED_KEY).await.unwrap(), 3);
    assert_eq!(h.stored_count().await, Some(3));
}

#[tokio::test]
async fn test_add_many_counts_whole_window() {
    let h = Harness::new();
    h.timeline
        .seed(FEED_KEY, vec![group("old-unseen", 1, false), group("old-seen", 2, true)])
        .await;

    h.feed().add_many(vec![like(1, 500, 10)]).await.unwrap();

    assert_eq!(h.stored_count().await, Some(2));
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_lock_contention_aborts_without_mutation() {
    let h = Harness::with_settings(FeedSettings {
        lock_acquire_timeout: std::time::Duration::from_millis(50),
        ..FeedSettings::default()
    });
    let feed = h.feed();
    let holder = Lease::new(feed.keys().lock(), std::time::Duration::from_secs(60));
    assert!(h.lock.try_acquire(&holder).await.unwrap());

    let result = feed.add_many(vec![like(1, 42, 0)]).await;

    assert!(matches!(result, Err(FeedError::LockContention { .. })));
    assert_eq!(h.timeline.stats().await, TimelineStats::default());
    assert_eq!(h.counts.write_count().await, 0);
    assert_eq!(h.notifier.attempt_count().await, 0);
}

#[tokio::test]
async fn test_storage_failure_does_not_advance_count() {
    let h = Harness::new();
    h.timeline.set_fail_on_add(true).await;
    let feed = h.feed();

    let result = feed.add_many(vec![like(1, 42, 0)]).await;

    assert!(matches!(result, Err(FeedError::Storage(_))));
    assert_eq!(h.counts.write_count().await, 0);
    assert_eq!(h.notifier.attempt_count().await, 0);

    // The lease was released
    h.timeline.set_fail_on_add(false).await;
    feed.add_many(vec![like(1, 42, 0)]).await.unwrap();
    assert_eq!(h.stored_count().await, Some(1));
}

#[tokio::test]
async fn test_publish_failure_is_swallowed() {
    let h = Harness::new();
    h.notifier.set_fail_on_publish(true).await;

    let groups = h.feed().add_many(vec![like(1, 42, 0)]).await.unwrap();

    assert_eq!(groups.len(), 1);
    assert_eq!(h.stored_count().await, Some(1));
    assert_eq!(h.notifier.attempt_count().await, 1);
}

/// Grants every lease and reports it lost immediately.
struct ForgetfulLock;

#[async_trait]
impl FeedLock for ForgetfulLock {
    async fn try_acquire(&self, _lease: &Lease) -> crate::lock::Result<bool> {
        Ok(true)
    }

    async fn release(&self, _lease: &Lease) -> crate::lock::Result<()> {
        Ok(())
    }

    async fn is_held(&self, _lease: &Lease) -> crate::lock::Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_lost_lease_skips_count_write() {
    let h = Harness::new();
    let mut backend = h.backend.clone();
    backend.lock = Arc::new(ForgetfulLock);
    let feed = backend.feed(USER);

    let result = feed.add_many(vec![like(1, 42, 0)]).await;

    assert!(matches!(result, Err(FeedError::LeaseLost { .. })));
    // The structural insert stays; the count is repaired by the next recount
    assert_eq!(h.timeline.count(FEED_KEY).await.unwrap(), 1);
    assert_eq!(h.counts.write_count().await, 0);
    assert_eq!(h.notifier.attempt_count().await, 0);
}

#[test]
fn test_lock_errors_map_to_feed_errors() {
    let contention = FeedError::from(LockError::Contention {
        key: "k".to_string(),
        waited: std::time::Duration::from_millis(5),
    });
    assert!(matches!(contention, FeedError::LockContention { .. }));

    let backend = FeedError::from(LockError::Backend("down".to_string()));
    assert!(matches!(backend, FeedError::Lock(_)));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mark_all_never_interleaves() {
    let h = Harness::new();
    let groups: Vec<AggregatedActivity> = (0..5)
        .map(|i| group(&format!("g{}", i), i, false))
        .collect();
    h.timeline.seed(FEED_KEY, groups).await;
    h.counts.seed(COUNT_KEY, 5).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let backend = h.backend.clone();
        tasks.push(tokio::spawn(async move {
            backend.feed(USER).mark_all(true, false).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stored = h.timeline.groups(FEED_KEY).await;
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().all(|g| g.is_seen()));
    let stats = h.timeline.stats().await;
    assert_eq!(stats.groups_removed, 5);
    assert_eq!(stats.groups_added, 5);
    assert_eq!(h.notifier.published_counts().await, vec![0]);
}

#[tokio::test]
async fn test_feeds_of_different_users_are_independent() {
    let h = Harness::new();
    let alice = h.backend.feed("alice");
    let bob = h.backend.feed("bob");

    alice.add_many(vec![like(1, 42, 0)]).await.unwrap();

    assert_eq!(alice.get_denormalized_count().await.unwrap(), 1);
    assert_eq!(bob.get_denormalized_count().await.unwrap(), 0);
    let published = h.notifier.take_published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].channel, "alice");
}

// ============================================================================
// Wiring
// ============================================================================

#[tokio::test]
async fn test_backend_from_default_config() {
    let backend = FeedBackend::from_config(&Config::for_test()).await.unwrap();
    let feed = backend.feed("9");

    assert_eq!(feed.keys().feed(), "notification_feed:1:user:9");
    assert_eq!(feed.max_length(), 99);

    feed.add_many(vec![like(1, 42, 0)]).await.unwrap();
    assert_eq!(feed.get_denormalized_count().await.unwrap(), 1);
}

#[test]
fn test_settings_from_config() {
    let config = crate::config::FeedConfig {
        max_length: 10,
        lock_ttl_ms: 500,
        ..Default::default()
    };

    let settings = FeedSettings::from(&config);
    assert_eq!(settings.max_length, 10);
    assert_eq!(settings.lock_ttl, std::time::Duration::from_millis(500));
    assert_eq!(settings.merge_max_length, 20);
}
