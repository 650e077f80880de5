//! Redis CountStore implementation.
//!
//! Stores each count as a plain string key holding the integer as text.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info, warn};

use crate::storage::{CountStore, Result};

/// Redis count store.
pub struct RedisCountStore {
    conn: ConnectionManager,
}

impl RedisCountStore {
    /// Create a new Redis count store.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for counts");

        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

/// Parse a stored count, tolerating surrounding whitespace.
///
/// Returns `None` for values that are not a non-negative integer so that
/// the next recomputation overwrites them.
fn parse_count(key: &str, raw: &str) -> Option<u64> {
    match raw.trim().parse::<u64>() {
        Ok(count) => Some(count),
        Err(e) => {
            warn!(key = %key, raw = %raw, error = %e, "Ignoring unparseable stored count");
            None
        }
    }
}

#[async_trait]
impl CountStore for RedisCountStore {
    async fn get(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();

        let raw: Option<String> = conn.get(key).await?;

        Ok(raw.and_then(|r| parse_count(key, &r)))
    }

    async fn set(&self, key: &str, count: u64) -> Result<()> {
        let mut conn = self.conn.clone();

        let _: () = conn.set(key, count).await?;

        debug!(key = %key, count = count, "Stored count in Redis");
        Ok(())
    }
}
