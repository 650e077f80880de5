//! Per-user key derivation.

/// Storage keys and pub/sub routing key of one user's feed.
///
/// ```text
/// feed:    {prefix}:user:{user_id}
/// count:   {prefix}:user:{user_id}:count
/// lock:    {prefix}:user:{user_id}:lock
/// channel: {user_id}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedKeys {
    feed: String,
    count: String,
    lock: String,
    pubsub_channel: String,
}

impl FeedKeys {
    pub fn new(prefix: &str, user_id: &str) -> Self {
        let feed = format!("{}:user:{}", prefix, user_id);
        Self {
            count: format!("{}:count", feed),
            lock: format!("{}:lock", feed),
            pubsub_channel: user_id.to_string(),
            feed,
        }
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub fn count(&self) -> &str {
        &self.count
    }

    pub fn lock(&self) -> &str {
        &self.lock
    }

    pub fn pubsub_channel(&self) -> &str {
        &self.pubsub_channel
    }
}
