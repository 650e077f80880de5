//! Redis PUBLISH notifier.
//!
//! Publishes encoded envelopes on the shared main channel. Redis pub/sub is
//! fire-and-forget: a message published while nobody listens is lost.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info};

use super::{BusError, CountEnvelope, Notifier, Result};

/// Redis notifier.
pub struct RedisNotifier {
    conn: ConnectionManager,
    main_channel: String,
}

impl RedisNotifier {
    /// Create a new Redis notifier.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    /// * `main_channel` - Channel shared by all users
    pub async fn new(url: &str, main_channel: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(url = %url, main_channel = %main_channel, "Connected to Redis for count notifications");

        Ok(Self::from_connection(conn, main_channel))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager, main_channel: impl Into<String>) -> Self {
        Self {
            conn,
            main_channel: main_channel.into(),
        }
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(channel = %envelope.channel))]
    async fn publish(&self, envelope: &CountEnvelope) -> Result<()> {
        let payload = envelope.encode()?;
        let mut conn = self.conn.clone();

        let receivers: i64 = conn
            .publish(&self.main_channel, payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        debug!(
            main_channel = %self.main_channel,
            receivers = receivers,
            "Published count envelope to Redis"
        );
        Ok(())
    }
}
