//! Notification feed step definitions.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use cucumber::gherkin::Step;
use cucumber::{given, then, when, World};

use notifeed::activity::{Activity, AggregatedActivity};
use notifeed::aggregator::NotificationAggregator;
use notifeed::bus::MockNotifier;
use notifeed::feed::{FeedBackend, FeedError, FeedSettings, NotificationFeed};
use notifeed::lock::{FeedLock, InProcessFeedLock, Lease};
use notifeed::storage::mock::TimelineStats;
use notifeed::storage::{CountStore, MockCountStore, MockTimelineStore};

/// Test context for NotificationFeed scenarios.
#[derive(World)]
#[world(init = Self::new)]
pub struct NotificationFeedWorld {
    backend: FeedBackend,
    timeline: Arc<MockTimelineStore>,
    counts: Arc<MockCountStore>,
    notifier: Arc<MockNotifier>,
    lock: Arc<InProcessFeedLock>,
    user_id: String,
    next_object: u64,
    returned: Vec<AggregatedActivity>,
    last_error: Option<FeedError>,
}

impl std::fmt::Debug for NotificationFeedWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFeedWorld")
            .field("user_id", &self.user_id)
            .field("returned", &self.returned.len())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl NotificationFeedWorld {
    fn new() -> Self {
        let timeline = Arc::new(MockTimelineStore::new());
        let counts = Arc::new(MockCountStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let lock = Arc::new(InProcessFeedLock::new());
        let settings = FeedSettings {
            lock_acquire_timeout: Duration::from_millis(100),
            ..FeedSettings::default()
        };
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
            user_id: String::new(),
            next_object: 1,
            returned: Vec::new(),
            last_error: None,
        }
    }

    fn feed(&self) -> NotificationFeed {
        self.backend.feed(self.user_id.as_str())
    }

    fn next_activity(&mut self) -> Activity {
        let object = self.next_object;
        self.next_object += 1;
        let time = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .unwrap()
            + chrono::Duration::minutes(object as i64);
        Activity::new(1, "like", object, time)
    }

    async fn mark_all(&mut self, seen: bool, read: bool) {
        match self.feed().mark_all(seen, read).await {
            Ok(groups) => self.returned = groups,
            Err(e) => self.last_error = Some(e),
        }
    }

    async fn stats(&self) -> TimelineStats {
        self.timeline.stats().await
    }
}

// ==========================================================================
// Background
// ==========================================================================

#[given(expr = "a notification feed for user {string}")]
async fn given_feed(world: &mut NotificationFeedWorld, user_id: String) {
    world.user_id = user_id;
}

// ==========================================================================
// Setup
// ==========================================================================

#[given(expr = "the feed holds {int} unseen and {int} seen groups")]
async fn given_groups(world: &mut NotificationFeedWorld, unseen: usize, seen: usize) {
    let aggregator = NotificationAggregator::default();
    let activities: Vec<Activity> = (0..unseen + seen).map(|_| world.next_activity()).collect();
    let mut groups = notifeed::aggregator::Aggregator::aggregate(&aggregator, activities);
    for group in groups.iter_mut().skip(unseen) {
        group.mark_seen(Utc::now());
    }

    let key = world.feed().keys().feed().to_string();
    world.timeline.seed(&key, groups).await;
}

#[given(expr = "the stored count is set to {int}")]
async fn given_stored_count(world: &mut NotificationFeedWorld, count: u64) {
    let key = world.feed().keys().count().to_string();
    world.counts.seed(&key, count).await;
}

#[given("another holder owns the feed lock")]
async fn given_lock_held(world: &mut NotificationFeedWorld) {
    let key = world.feed().keys().lock().to_string();
    let lease = Lease::new(key, Duration::from_secs(60));
    let acquired = world.lock.try_acquire(&lease).await.expect("Lock failed");
    assert!(acquired, "Lock should have been free");
}

#[given("the notifier is failing")]
async fn given_notifier_failing(world: &mut NotificationFeedWorld) {
    world.notifier.set_fail_on_publish(true).await;
}

// ==========================================================================
// Operations
// ==========================================================================

#[when(expr = "{int} activities on distinct objects are added")]
async fn when_add(world: &mut NotificationFeedWorld, n: usize) {
    let activities: Vec<Activity> = (0..n).map(|_| world.next_activity()).collect();
    match world.feed().add_many(activities).await {
        Ok(groups) => world.returned = groups,
        Err(e) => world.last_error = Some(e),
    }
}

#[when("all groups are marked seen")]
async fn when_mark_seen(world: &mut NotificationFeedWorld) {
    world.mark_all(true, false).await;
}

#[when("all groups are marked read")]
async fn when_mark_read(world: &mut NotificationFeedWorld) {
    world.mark_all(false, true).await;
}

#[when("the recorded operations are reset")]
async fn when_reset(world: &mut NotificationFeedWorld) {
    world.timeline.reset_stats().await;
    world.notifier.take_published().await;
}

#[when(expr = "{int} mark-all requests run concurrently")]
async fn when_concurrent_mark_all(world: &mut NotificationFeedWorld, n: usize) {
    let mut tasks = Vec::with_capacity(n);
    for _ in 0..n {
        let backend = world.backend.clone();
        let user_id = world.user_id.clone();
        tasks.push(tokio::spawn(async move {
            backend.feed(user_id).mark_all(true, false).await
        }));
    }
    for task in tasks {
        task.await
            .expect("Task panicked")
            .expect("Concurrent mark-all failed");
    }
}

// ==========================================================================
// Assertions
// ==========================================================================

#[then(expr = "the stored count is {int}")]
async fn then_stored_count(world: &mut NotificationFeedWorld, expected: u64) {
    assert!(world.last_error.is_none(), "Unexpected error: {:?}", world.last_error);
    let key = world.feed().keys().count().to_string();
    let stored = world.counts.get(&key).await.expect("Count read failed");
    assert_eq!(stored, Some(expected), "Stored count should match");
}

#[then(expr = "{int} count message is published")]
async fn then_published_one(world: &mut NotificationFeedWorld, expected: usize) {
    assert_eq!(world.notifier.published_count().await, expected);
}

#[then("no count message is published")]
async fn then_nothing_published(world: &mut NotificationFeedWorld) {
    assert_eq!(world.notifier.published_count().await, 0);
}

#[then("the last published envelope is:")]
async fn then_last_envelope(world: &mut NotificationFeedWorld, step: &Step) {
    let expected = step.docstring.as_ref().expect("Missing docstring").trim();
    let published = world.notifier.take_published().await;
    let last = published.last().expect("Nothing was published");
    assert_eq!(last.encode().expect("Encode failed"), expected);
}

#[then(expr = "{int} groups were replaced")]
async fn then_replaced(world: &mut NotificationFeedWorld, n: usize) {
    let stats = world.stats().await;
    assert_eq!(stats.groups_removed, n, "Removed groups should match");
    assert_eq!(stats.groups_added, n, "Inserted groups should match");
}

#[then("no group was removed or inserted")]
async fn then_untouched(world: &mut NotificationFeedWorld) {
    assert_eq!(world.stats().await, TimelineStats::default());
}

#[then("every visible group is seen")]
async fn then_all_seen(world: &mut NotificationFeedWorld) {
    let groups = world
        .feed()
        .get_slice(0, world.backend.settings.max_length)
        .await
        .expect("Read failed");
    assert!(!groups.is_empty());
    assert!(groups.iter().all(|g| g.is_seen()), "All groups should be seen");
}

#[then(expr = "the feed holds {int} groups")]
async fn then_feed_holds(world: &mut NotificationFeedWorld, n: usize) {
    let key = world.feed().keys().feed().to_string();
    let groups = world.timeline.groups(&key).await;
    assert_eq!(groups.len(), n);

    let mut names: Vec<&str> = groups.iter().map(|g| g.group.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), n, "Every group should appear exactly once");
}

#[then(expr = "the mark-all returned {int} unseen groups")]
async fn then_returned_unseen(world: &mut NotificationFeedWorld, n: usize) {
    assert_eq!(world.returned.len(), n);
    assert!(world.returned.iter().all(|g| !g.is_seen()));
}

#[then("the operation fails with lock contention")]
async fn then_contention(world: &mut NotificationFeedWorld) {
    assert!(
        matches!(world.last_error, Some(FeedError::LockContention { .. })),
        "Expected lock contention, got {:?}",
        world.last_error
    );
}
