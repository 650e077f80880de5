//! Aggregation and ranking of activities into groups.
//!
//! The notification feed never decides grouping or ranking itself; it asks an
//! [`Aggregator`] to fold incoming activities into the current groups and to
//! order candidate groups by recency.

use std::collections::HashMap;

use crate::activity::{
    Activity, AggregatedActivity, GroupTransition, DEFAULT_MAX_AGGREGATED_ACTIVITIES,
};

/// Result of merging new activities into existing groups.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Groups that did not exist among the merge candidates.
    pub new: Vec<AggregatedActivity>,
    /// Existing groups that received at least one new activity.
    pub changed: Vec<GroupTransition>,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty()
    }

    /// Old snapshots that must be removed before inserting.
    pub fn to_remove(&self) -> Vec<AggregatedActivity> {
        self.changed.iter().map(|t| t.old.clone()).collect()
    }

    /// Snapshots to insert: new groups followed by updated ones.
    pub fn to_add(&self) -> Vec<AggregatedActivity> {
        self.new
            .iter()
            .cloned()
            .chain(self.changed.iter().map(|t| t.new.clone()))
            .collect()
    }
}

enum Slot {
    New(usize),
    Changed(usize),
}

/// Groups activities and ranks groups.
pub trait Aggregator: Send + Sync {
    /// Group key for an activity. Activities with equal keys share a group.
    fn group_key(&self, activity: &Activity) -> String;

    /// Maximum number of activities retained per group.
    fn max_activities(&self) -> usize {
        DEFAULT_MAX_AGGREGATED_ACTIVITIES
    }

    /// Fold activities into fresh groups.
    fn aggregate(&self, activities: Vec<Activity>) -> Vec<AggregatedActivity> {
        self.merge(&[], activities).new
    }

    /// Fold activities into `current`, reporting new and changed groups.
    ///
    /// Existing groups keep their seen/read stamps. Activities already present
    /// in a group are ignored, so a group whose only incoming activities are
    /// duplicates is not reported as changed.
    fn merge(&self, current: &[AggregatedActivity], activities: Vec<Activity>) -> MergeOutcome {
        let max_activities = self.max_activities();
        let existing: HashMap<&str, &AggregatedActivity> =
            current.iter().map(|g| (g.group.as_str(), g)).collect();

        let mut activities = activities;
        activities.sort_by_key(|a| a.time);

        let mut outcome = MergeOutcome::default();
        let mut slots: HashMap<String, Slot> = HashMap::new();

        for activity in activities {
            let key = self.group_key(&activity);
            match slots.get(&key) {
                Some(Slot::New(idx)) => {
                    outcome.new[*idx].append(activity, max_activities);
                }
                Some(Slot::Changed(idx)) => {
                    outcome.changed[*idx].new.append(activity, max_activities);
                }
                None => match existing.get(key.as_str()) {
                    Some(old) => {
                        let mut updated = (*old).clone();
                        if updated.append(activity, max_activities) {
                            slots.insert(key, Slot::Changed(outcome.changed.len()));
                            outcome.changed.push(GroupTransition {
                                old: (*old).clone(),
                                new: updated,
                            });
                        }
                    }
                    None => {
                        let mut group = AggregatedActivity::new(key.clone(), activity.time);
                        group.append(activity, max_activities);
                        slots.insert(key, Slot::New(outcome.new.len()));
                        outcome.new.push(group);
                    }
                },
            }
        }

        outcome
    }

    /// Order groups most recent first.
    fn rank(&self, groups: Vec<AggregatedActivity>) -> Vec<AggregatedActivity> {
        rank_by_recency(groups)
    }
}

/// Sort by `updated_at` (millisecond precision) descending, ties by group key
/// descending.
///
/// This is the order a Redis sorted set scored in milliseconds returns from
/// a reverse range, so every timeline backend ranks identically.
pub fn rank_by_recency(mut groups: Vec<AggregatedActivity>) -> Vec<AggregatedActivity> {
    groups.sort_by(|a, b| {
        b.updated_at
            .timestamp_millis()
            .cmp(&a.updated_at.timestamp_millis())
            .then_with(|| b.group.cmp(&a.group))
    });
    groups
}

/// Groups activities by verb and day: "5 people followed you today".
#[derive(Debug, Clone)]
pub struct RecentVerbAggregator {
    max_activities: usize,
}

impl RecentVerbAggregator {
    pub fn new(max_activities: usize) -> Self {
        Self { max_activities }
    }
}

impl Default for RecentVerbAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGGREGATED_ACTIVITIES)
    }
}

impl Aggregator for RecentVerbAggregator {
    fn group_key(&self, activity: &Activity) -> String {
        format!("{}-{}", activity.verb, activity.time.format("%Y-%m-%d"))
    }

    fn max_activities(&self) -> usize {
        self.max_activities
    }
}

/// Groups activities by verb, object and day: "3 people liked your post".
#[derive(Debug, Clone)]
pub struct NotificationAggregator {
    max_activities: usize,
}

impl NotificationAggregator {
    pub fn new(max_activities: usize) -> Self {
        Self { max_activities }
    }
}

impl Default for NotificationAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGGREGATED_ACTIVITIES)
    }
}

impl Aggregator for NotificationAggregator {
    fn group_key(&self, activity: &Activity) -> String {
        format!(
            "{}-{}-{}",
            activity.verb,
            activity.object_id,
            activity.time.format("%Y-%m-%d")
        )
    }

    fn max_activities(&self) -> usize {
        self.max_activities
    }
}
