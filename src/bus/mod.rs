//! Count notification bus.
//!
//! This module contains:
//! - `Notifier` trait: fire-and-forget delivery of count envelopes
//! - `CountEnvelope` / `CountMessage`: the fixed wire format
//! - Implementations: Channel (in-process), Redis PUBLISH, Mock
//!
//! All users share one main channel; the envelope's `channel` field scopes a
//! message to a user.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{MessagingConfig, MessagingType};

mod envelope;

// Implementation modules
#[cfg(feature = "channel")]
pub mod channel;
pub mod mock;
#[cfg(feature = "redis")]
pub mod redis;

// Re-exports
#[cfg(feature = "channel")]
pub use channel::ChannelNotifier;
pub use envelope::{CountEnvelope, CountMessage};
pub use mock::MockNotifier;
#[cfg(feature = "redis")]
pub use self::redis::RedisNotifier;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Delivery of count envelopes to subscribers.
///
/// Implementations:
/// - `ChannelNotifier`: tokio broadcast channel within one process
/// - `RedisNotifier`: Redis PUBLISH on the main channel
/// - `MockNotifier`: records envelopes for testing
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish one envelope on the main channel.
    ///
    /// Delivery is best effort. Callers log failures and carry on; a lost
    /// message is corrected by the next count change.
    async fn publish(&self, envelope: &CountEnvelope) -> Result<()>;
}

/// Initialize the notifier based on configuration.
pub async fn init_notifier(config: &MessagingConfig) -> Result<Arc<dyn Notifier>> {
    match config.messaging_type {
        #[cfg(feature = "channel")]
        MessagingType::Channel => {
            info!(main_channel = %config.main_channel, "Notifier: channel");
            Ok(Arc::new(ChannelNotifier::new(&config.main_channel)))
        }
        #[cfg(not(feature = "channel"))]
        MessagingType::Channel => Err(BusError::Connection(
            "Channel notifier requested but 'channel' feature is not enabled".to_string(),
        )),
        #[cfg(feature = "redis")]
        MessagingType::Redis => {
            info!(
                url = %config.redis.url,
                main_channel = %config.main_channel,
                "Notifier: redis"
            );
            let notifier = RedisNotifier::new(&config.redis.url, &config.main_channel).await?;
            Ok(Arc::new(notifier))
        }
        #[cfg(not(feature = "redis"))]
        MessagingType::Redis => Err(BusError::Connection(
            "Redis notifier requested but 'redis' feature is not enabled".to_string(),
        )),
    }
}
