//! Redis TimelineStore implementation.
//!
//! Each feed key maps to two Redis keys:
//! - `{key}`: sorted set of group keys scored by `updated_at` (millis)
//! - `{key}:groups`: hash of group key -> JSON snapshot
//!
//! Keeping identity (the sorted set member) apart from the snapshot lets
//! removal work by group key, whatever snapshot the caller holds. Equal
//! scores come back from a reverse range ordered by member descending.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info, warn};

use crate::activity::AggregatedActivity;
use crate::storage::{Result, TimelineStore};

/// Redis timeline store.
pub struct RedisTimelineStore {
    conn: ConnectionManager,
}

impl RedisTimelineStore {
    /// Create a new Redis timeline store.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for timelines");

        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Build the snapshot hash key for a feed key.
    fn groups_key(key: &str) -> String {
        format!("{}:groups", key)
    }

    fn score(group: &AggregatedActivity) -> f64 {
        group.updated_at.timestamp_millis() as f64
    }

    /// Fetch snapshots for `ids`, in order.
    ///
    /// Returns the decoded groups and the ids that have no snapshot.
    async fn load(
        &self,
        key: &str,
        ids: &[String],
    ) -> Result<(Vec<AggregatedActivity>, Vec<String>)> {
        if ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let mut conn = self.conn.clone();

        let payloads: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(Self::groups_key(key))
            .arg(ids)
            .query_async(&mut conn)
            .await?;

        let mut groups = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for (id, payload) in ids.iter().zip(payloads) {
            match payload {
                Some(json) => groups.push(serde_json::from_str(&json)?),
                None => missing.push(id.clone()),
            }
        }
        Ok((groups, missing))
    }

    /// Remove members and their snapshots in one transaction.
    async fn remove_ids(&self, key: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .zrem(key, ids)
            .ignore()
            .hdel(Self::groups_key(key), ids)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl TimelineStore for RedisTimelineStore {
    async fn get_slice(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<AggregatedActivity>> {
        if stop <= start {
            return Ok(Vec::new());
        }

        // Members without a snapshot are dropped and the range re-read; each
        // pass removes at least one member.
        loop {
            let mut conn = self.conn.clone();
            let ids: Vec<String> = conn
                .zrevrange(key, start as isize, (stop - 1) as isize)
                .await?;

            let (groups, orphans) = self.load(key, &ids).await?;
            if orphans.is_empty() {
                return Ok(groups);
            }

            warn!(key = %key, orphans = ?orphans, "Dropping timeline members with no snapshot");
            self.remove_ids(key, &orphans).await?;
        }
    }

    async fn get_many(
        &self,
        key: &str,
        group_keys: &[String],
    ) -> Result<Vec<AggregatedActivity>> {
        let (groups, _) = self.load(key, group_keys).await?;
        Ok(groups)
    }

    async fn add_many(&self, key: &str, groups: Vec<AggregatedActivity>) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }
        let groups_key = Self::groups_key(key);
        let mut pipe = redis::pipe();
        pipe.atomic();

        for group in &groups {
            let json = serde_json::to_string(group)?;
            pipe.zadd(key, &group.group, Self::score(group))
                .ignore()
                .hset(&groups_key, &group.group, json)
                .ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(key = %key, count = groups.len(), "Added groups to Redis timeline");
        Ok(())
    }

    async fn remove_many(&self, key: &str, groups: &[AggregatedActivity]) -> Result<()> {
        let ids: Vec<String> = groups.iter().map(|g| g.group.clone()).collect();
        self.remove_ids(key, &ids).await?;

        debug!(key = %key, count = ids.len(), "Removed groups from Redis timeline");
        Ok(())
    }

    async fn count(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(key).await?;
        Ok(count)
    }

    async fn trim(&self, key: &str, length: usize) -> Result<()> {
        let mut conn = self.conn.clone();

        // Everything ranked after the first `length` entries
        let overflow: Vec<String> = conn.zrevrange(key, length as isize, -1).await?;
        if overflow.is_empty() {
            return Ok(());
        }
        self.remove_ids(key, &overflow).await?;

        debug!(key = %key, trimmed = overflow.len(), "Trimmed Redis timeline");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(vec![key.to_string(), Self::groups_key(key)]).await?;
        Ok(())
    }
}
