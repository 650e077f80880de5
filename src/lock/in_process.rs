//! In-process lease lock.
//!
//! Serializes feed mutations inside one process. Expiry uses tokio's clock,
//! so tests can drive it with `tokio::time::pause` and `advance`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{FeedLock, Lease, Result};

struct HeldLease {
    token: String,
    expires_at: Instant,
}

/// Lease lock backed by a map of live leases.
#[derive(Default)]
pub struct InProcessFeedLock {
    leases: Mutex<HashMap<String, HeldLease>>,
}

impl InProcessFeedLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedLock for InProcessFeedLock {
    async fn try_acquire(&self, lease: &Lease) -> Result<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock().await;

        if let Some(held) = leases.get(lease.key()) {
            if held.expires_at > now {
                return Ok(false);
            }
        }

        leases.insert(
            lease.key().to_string(),
            HeldLease {
                token: lease.token().to_string(),
                expires_at: now + lease.ttl(),
            },
        );
        Ok(true)
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.lock().await;
        if leases
            .get(lease.key())
            .is_some_and(|held| held.token == lease.token())
        {
            leases.remove(lease.key());
        }
        Ok(())
    }

    async fn is_held(&self, lease: &Lease) -> Result<bool> {
        let now = Instant::now();
        let leases = self.leases.lock().await;
        Ok(leases
            .get(lease.key())
            .is_some_and(|held| held.token == lease.token() && held.expires_at > now))
    }
}
