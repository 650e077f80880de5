//! Mock notifier implementation for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, CountEnvelope, CountMessage, Notifier, Result};

/// Mock notifier that records every published envelope.
#[derive(Default)]
pub struct MockNotifier {
    published: RwLock<Vec<CountEnvelope>>,
    attempts: RwLock<usize>,
    fail_on_publish: RwLock<bool>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Successfully published envelopes.
    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    /// Publish calls, including failed ones.
    pub async fn attempt_count(&self) -> usize {
        *self.attempts.read().await
    }

    pub async fn take_published(&self) -> Vec<CountEnvelope> {
        std::mem::take(&mut *self.published.write().await)
    }

    /// Decoded counts of published envelopes, in publish order.
    pub async fn published_counts(&self) -> Vec<u64> {
        self.published
            .read()
            .await
            .iter()
            .filter_map(|e| e.message().ok())
            .map(|m: CountMessage| m.unseen_count)
            .collect()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn publish(&self, envelope: &CountEnvelope) -> Result<()> {
        *self.attempts.write().await += 1;
        if *self.fail_on_publish.read().await {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        self.published.write().await.push(envelope.clone());
        Ok(())
    }
}
