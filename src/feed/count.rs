//! Denormalized unseen count of one feed.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::{CountEnvelope, Notifier};
use crate::storage::{CountStore, StorageError};

/// Stored count plus its notification side channel.
///
/// `set` stores first and publishes second. A failed publish is logged and
/// never undoes the stored value.
#[derive(Clone)]
pub struct CountCache {
    store: Arc<dyn CountStore>,
    notifier: Arc<dyn Notifier>,
    key: String,
    channel: String,
}

impl CountCache {
    pub fn new(
        store: Arc<dyn CountStore>,
        notifier: Arc<dyn Notifier>,
        key: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            key: key.into(),
            channel: channel.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last stored count; zero if never written.
    pub async fn get(&self) -> Result<u64, StorageError> {
        Ok(self.store.get(&self.key).await?.unwrap_or(0))
    }

    /// Store `count`, then publish it.
    pub async fn set(&self, count: u64) -> Result<(), StorageError> {
        self.store.set(&self.key, count).await?;
        debug!(key = %self.key, count = count, "Stored denormalized count");
        self.publish(count).await;
        Ok(())
    }

    /// Best-effort publish of `count` on the user's channel.
    pub async fn publish(&self, count: u64) {
        let envelope = match CountEnvelope::for_count(self.channel.as_str(), count) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "Failed to encode count envelope");
                return;
            }
        };

        if let Err(e) = self.notifier.publish(&envelope).await {
            warn!(
                channel = %self.channel,
                count = count,
                error = %e,
                "Failed to publish count"
            );
        }
    }
}
