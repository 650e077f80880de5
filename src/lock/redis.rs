//! Redis lease lock.
//!
//! A lease is a string key holding the holder's token with a PX expiry:
//! `SET key token NX PX ttl`. Release and validation compare the token, so
//! a holder whose lease expired and was re-acquired by someone else can
//! neither delete nor trust the new lease.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};
use tracing::{debug, info};

use super::{FeedLock, Lease, Result};

/// Delete the key only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed lease lock.
pub struct RedisFeedLock {
    conn: ConnectionManager,
    release_script: Script,
}

impl RedisFeedLock {
    /// Create a new Redis lease lock.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for feed locks");

        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl FeedLock for RedisFeedLock {
    async fn try_acquire(&self, lease: &Lease) -> Result<bool> {
        let mut conn = self.conn.clone();
        // PX 0 is rejected by Redis
        let ttl_ms = lease.ttl().as_millis().max(1) as u64;

        let reply: Option<String> = redis::cmd("SET")
            .arg(lease.key())
            .arg(lease.token())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut conn = self.conn.clone();

        let deleted: i64 = self
            .release_script
            .key(lease.key())
            .arg(lease.token())
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            debug!(key = %lease.key(), "Lease already expired or taken over");
        }
        Ok(())
    }

    async fn is_held(&self, lease: &Lease) -> Result<bool> {
        let mut conn = self.conn.clone();
        let holder: Option<String> = conn.get(lease.key()).await?;
        Ok(holder.as_deref() == Some(lease.token()))
    }
}
