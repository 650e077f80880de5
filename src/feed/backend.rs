//! Collaborators shared by every feed.

use std::sync::Arc;

use tracing::info;

use super::{FeedSettings, NotificationFeed};
use crate::aggregator::{Aggregator, NotificationAggregator, RecentVerbAggregator};
use crate::bus::{self, Notifier};
use crate::config::{AggregatorType, Config, FeedConfig, DEFAULT_KEY_PREFIX};
use crate::lock::{self, FeedLock};
use crate::storage::{self, CountStore, TimelineStore};

/// Injected store, lock, bus and aggregation handles.
///
/// Cloning is cheap; every handle is shared.
#[derive(Clone)]
pub struct FeedBackend {
    pub timeline: Arc<dyn TimelineStore>,
    pub counts: Arc<dyn CountStore>,
    pub lock: Arc<dyn FeedLock>,
    pub notifier: Arc<dyn Notifier>,
    pub aggregator: Arc<dyn Aggregator>,
    pub settings: FeedSettings,
    pub key_prefix: String,
}

impl FeedBackend {
    /// Backend with default settings and key prefix.
    pub fn new(
        timeline: Arc<dyn TimelineStore>,
        counts: Arc<dyn CountStore>,
        lock: Arc<dyn FeedLock>,
        notifier: Arc<dyn Notifier>,
        aggregator: Arc<dyn Aggregator>,
    ) -> Self {
        Self {
            timeline,
            counts,
            lock,
            notifier,
            aggregator,
            settings: FeedSettings::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn with_settings(mut self, settings: FeedSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    /// Feed of `user_id` over these collaborators.
    pub fn feed(&self, user_id: impl Into<String>) -> NotificationFeed {
        NotificationFeed::new(self, user_id)
    }

    /// Build every collaborator from configuration.
    pub async fn from_config(
        config: &Config,
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let (timeline, counts) = storage::init_storage(&config.storage).await?;
        let lock = lock::init_lock(&config.storage).await?;
        let notifier = bus::init_notifier(&config.messaging).await?;
        let aggregator = aggregator_for(&config.feed);

        info!(
            key_prefix = %config.feed.key_prefix,
            max_length = config.feed.max_length,
            aggregator = ?config.feed.aggregator,
            "Feed backend initialized"
        );

        Ok(Self::new(timeline, counts, lock, notifier, aggregator)
            .with_settings(FeedSettings::from(&config.feed))
            .with_key_prefix(config.feed.key_prefix.clone()))
    }
}

fn aggregator_for(config: &FeedConfig) -> Arc<dyn Aggregator> {
    match config.aggregator {
        AggregatorType::Notification => {
            Arc::new(NotificationAggregator::new(config.max_aggregated_activities))
        }
        AggregatorType::RecentVerb => {
            Arc::new(RecentVerbAggregator::new(config.max_aggregated_activities))
        }
    }
}
