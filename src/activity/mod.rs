//! Activity and aggregated activity types.
//!
//! An [`Activity`] is a single "actor verb object" occurrence. Activities that
//! share a group key are folded into an [`AggregatedActivity`], which is what a
//! notification feed stores and what carries the seen/read state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of activities kept inside a single aggregated group.
pub const DEFAULT_MAX_AGGREGATED_ACTIVITIES: usize = 15;

/// A single activity, e.g. "user 7 liked post 42".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub actor_id: u64,
    pub verb: String,
    pub object_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<u64>,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra_context: serde_json::Map<String, serde_json::Value>,
}

impl Activity {
    pub fn new(actor_id: u64, verb: impl Into<String>, object_id: u64, time: DateTime<Utc>) -> Self {
        Self {
            actor_id,
            verb: verb.into(),
            object_id,
            target_id: None,
            time,
            extra_context: serde_json::Map::new(),
        }
    }

    pub fn with_target(mut self, target_id: u64) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra_context.insert(key.into(), value);
        self
    }

    /// Stable identifier for de-duplication.
    ///
    /// Format: `{time_millis}:{actor_id}:{verb}:{object_id}`
    pub fn serialization_id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.time.timestamp_millis(),
            self.actor_id,
            self.verb,
            self.object_id
        )
    }
}

/// A group of activities sharing one group key.
///
/// Snapshots are values: changing seen/read state produces a new snapshot with
/// the same `group`, which the timeline store must replace explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedActivity {
    pub group: String,
    pub activities: Vec<Activity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    /// Activities dropped from `activities` to respect the per-group cap.
    #[serde(default)]
    pub minimized_activities: usize,
}

impl AggregatedActivity {
    /// Create an empty group. Timestamps are set by the first `append`.
    pub fn new(group: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            group: group.into(),
            activities: Vec::new(),
            created_at,
            updated_at: created_at,
            seen_at: None,
            read_at: None,
            minimized_activities: 0,
        }
    }

    pub fn is_seen(&self) -> bool {
        self.seen_at.is_some()
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// Stamp `seen_at` if unset. Returns true if the stamp changed.
    pub fn mark_seen(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_seen() {
            return false;
        }
        self.seen_at = Some(now);
        true
    }

    /// Stamp `read_at` if unset. Returns true if the stamp changed.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_read() {
            return false;
        }
        self.read_at = Some(now);
        true
    }

    pub fn contains(&self, activity: &Activity) -> bool {
        let id = activity.serialization_id();
        self.activities.iter().any(|a| a.serialization_id() == id)
    }

    /// Add an activity to the group.
    ///
    /// Returns false (and leaves the group untouched) if the activity is
    /// already present. When the group holds more than `max_activities`
    /// entries the oldest are dropped and tallied in `minimized_activities`.
    pub fn append(&mut self, activity: Activity, max_activities: usize) -> bool {
        if self.contains(&activity) {
            return false;
        }

        if self.activities.is_empty() {
            self.created_at = activity.time;
            self.updated_at = activity.time;
        } else {
            self.created_at = self.created_at.min(activity.time);
            self.updated_at = self.updated_at.max(activity.time);
        }

        self.activities.push(activity);
        self.activities.sort_by_key(|a| a.time);

        let max_activities = max_activities.max(1);
        if self.activities.len() > max_activities {
            let overflow = self.activities.len() - max_activities;
            self.activities.drain(..overflow);
            self.minimized_activities += overflow;
        }
        true
    }

    /// Total number of activities folded into this group, including minimized ones.
    pub fn activity_count(&self) -> usize {
        self.activities.len() + self.minimized_activities
    }

    /// Distinct actors among the retained activities, most recent first.
    pub fn actor_ids(&self) -> Vec<u64> {
        let mut actors = Vec::new();
        for activity in self.activities.iter().rev() {
            if !actors.contains(&activity.actor_id) {
                actors.push(activity.actor_id);
            }
        }
        actors
    }

    pub fn actor_count(&self) -> usize {
        self.actor_ids().len()
    }

    pub fn verb(&self) -> Option<&str> {
        self.activities.first().map(|a| a.verb.as_str())
    }

    pub fn last_activity(&self) -> Option<&Activity> {
        self.activities.last()
    }
}

/// An explicit old/new snapshot pair for one group identity.
///
/// Used wherever a stored group has to be replaced: the old snapshot is
/// removed before the new one is inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupTransition {
    pub old: AggregatedActivity,
    pub new: AggregatedActivity,
}

impl GroupTransition {
    pub fn group(&self) -> &str {
        &self.new.group
    }
}
