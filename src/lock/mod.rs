//! Per-user feed lock.
//!
//! A lock is a lease: an exclusive claim on a key that expires on its own
//! after a TTL, so a crashed holder cannot block the key forever. Each lease
//! carries a random token; release and validation only succeed for the
//! token that acquired it.
//!
//! Expiry means a slow holder may lose exclusivity mid-operation. Holders
//! that are about to commit should call [`FeedLock::is_held`] first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{StorageConfig, StorageType};

mod in_process;
#[cfg(feature = "redis")]
mod redis;

pub use in_process::InProcessFeedLock;
#[cfg(feature = "redis")]
pub use self::redis::RedisFeedLock;

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

/// Errors that can occur while acquiring or releasing a lease.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Lock contention on {key}: not acquired within {waited:?}")]
    Contention { key: String, waited: Duration },

    #[error("Lock backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "redis")]
impl From<::redis::RedisError> for LockError {
    fn from(err: ::redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// A claim on a lock key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    key: String,
    token: String,
    ttl: Duration,
}

impl Lease {
    /// New lease request with a fresh random token.
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            token: Uuid::new_v4().to_string(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Lease-based mutual exclusion keyed by string.
#[async_trait]
pub trait FeedLock: Send + Sync {
    /// Single acquisition attempt. Returns false if another live lease holds the key.
    async fn try_acquire(&self, lease: &Lease) -> Result<bool>;

    /// Release the lease. A no-op if the lease expired or was taken over.
    async fn release(&self, lease: &Lease) -> Result<()>;

    /// Whether `lease` still owns its key.
    async fn is_held(&self, lease: &Lease) -> Result<bool>;
}

/// Backoff between acquisition attempts. The overall wait is bounded by
/// the caller's timeout, not by the attempt count.
fn acquire_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(5))
        .with_max_delay(MAX_RETRY_DELAY)
        .with_jitter()
}

const MAX_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Acquire `key`, retrying until `timeout` elapses.
///
/// Returns [`LockError::Contention`] if the key stays held for the whole
/// wait. Backend errors abort immediately.
pub async fn acquire(
    lock: &dyn FeedLock,
    key: &str,
    ttl: Duration,
    timeout: Duration,
) -> Result<Lease> {
    let lease = Lease::new(key, ttl);
    let deadline = Instant::now() + timeout;
    let mut backoff_iter = acquire_backoff().build();

    loop {
        if lock.try_acquire(&lease).await? {
            debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Lease acquired");
            return Ok(lease);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(LockError::Contention {
                key: key.to_string(),
                waited: timeout,
            });
        }

        let delay = backoff_iter
            .next()
            .unwrap_or(MAX_RETRY_DELAY)
            .min(deadline - now);
        tokio::time::sleep(delay).await;
    }
}

/// Scoped lease: released on [`LeaseGuard::release`] or, failing that, on drop.
///
/// Dropping a guard without releasing it (panic or cancellation of the
/// owning future) spawns the release on the current runtime. Outside a
/// runtime the lease is left to expire.
pub struct LeaseGuard {
    lock: Arc<dyn FeedLock>,
    lease: Lease,
    released: bool,
}

impl LeaseGuard {
    /// Acquire `key` and wrap the lease in a guard.
    pub async fn acquire(
        lock: Arc<dyn FeedLock>,
        key: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let lease = acquire(lock.as_ref(), key, ttl, timeout).await?;
        Ok(Self {
            lock,
            lease,
            released: false,
        })
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub async fn is_held(&self) -> Result<bool> {
        self.lock.is_held(&self.lease).await
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release(&self.lease).await
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = Arc::clone(&self.lock);
        let lease = self.lease.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release(&lease).await {
                        warn!(key = %lease.key(), error = %e, "Failed to release dropped lease");
                    }
                });
            }
            Err(_) => {
                warn!(key = %self.lease.key(), "Lease dropped outside a runtime, waiting for expiry");
            }
        }
    }
}

/// Run `f` while holding `key`.
///
/// The lease is released after `f` completes, whether it succeeded or not.
/// A failed release is logged; the lease expires on its own.
pub async fn with_lock<T, E, F, Fut>(
    lock: Arc<dyn FeedLock>,
    key: &str,
    ttl: Duration,
    timeout: Duration,
    f: F,
) -> std::result::Result<T, E>
where
    E: From<LockError>,
    F: FnOnce(Lease) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let guard = LeaseGuard::acquire(lock, key, ttl, timeout).await?;
    let result = f(guard.lease().clone()).await;

    if let Err(e) = guard.release().await {
        warn!(key = %key, error = %e, "Failed to release lease");
    }
    result
}

/// Initialize the lock backend that matches the storage configuration.
pub async fn init_lock(config: &StorageConfig) -> Result<Arc<dyn FeedLock>> {
    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(InProcessFeedLock::new())),
        #[cfg(feature = "redis")]
        StorageType::Redis => Ok(Arc::new(RedisFeedLock::new(&config.redis.url).await?)),
        #[cfg(not(feature = "redis"))]
        StorageType::Redis => Err(LockError::Backend(
            "Redis lock requested but 'redis' feature is not enabled".to_string(),
        )),
    }
}
