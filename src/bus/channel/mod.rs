//! In-memory channel-based notifier for standalone mode.
//!
//! Uses a tokio broadcast channel as the shared main channel within a single
//! process. Ideal for local development and testing without a broker.

use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

use super::{CountEnvelope, CountMessage, Notifier, Result};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// In-process notifier using a tokio broadcast channel.
///
/// Every subscriber sees every envelope, as on a real shared channel.
/// [`ChannelNotifier::subscribe_user`] filters on the subscriber side.
pub struct ChannelNotifier {
    main_channel: String,
    sender: broadcast::Sender<Arc<CountEnvelope>>,
}

impl ChannelNotifier {
    /// Create a new channel notifier.
    pub fn new(main_channel: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let main_channel = main_channel.into();

        info!(main_channel = %main_channel, "Channel notifier initialized");

        Self {
            main_channel,
            sender,
        }
    }

    pub fn main_channel(&self) -> &str {
        &self.main_channel
    }

    /// Receive every envelope published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CountEnvelope>> {
        self.sender.subscribe()
    }

    /// Stream of count messages addressed to `user_channel`.
    ///
    /// Lagged receivers skip the messages they missed; the next message
    /// carries the current count anyway.
    pub fn subscribe_user(
        &self,
        user_channel: impl Into<String>,
    ) -> impl Stream<Item = CountMessage> + Send + 'static {
        let user_channel = user_channel.into();
        BroadcastStream::new(self.sender.subscribe()).filter_map(move |received| {
            match received {
                Ok(envelope) if envelope.channel == user_channel => match envelope.message() {
                    Ok(message) => Some(message),
                    Err(e) => {
                        error!(channel = %envelope.channel, error = %e, "Undecodable count message");
                        None
                    }
                },
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    error!(skipped = n, "Count subscriber lagged, skipped messages");
                    None
                }
            }
        })
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(channel = %envelope.channel))]
    async fn publish(&self, envelope: &CountEnvelope) -> Result<()> {
        // Send to channel (ignore error if no receivers)
        match self.sender.send(Arc::new(envelope.clone())) {
            Ok(receiver_count) => {
                debug!(
                    main_channel = %self.main_channel,
                    receivers = receiver_count,
                    "Published count envelope to channel"
                );
            }
            Err(_) => {
                debug!(main_channel = %self.main_channel, "Published count envelope (no receivers)");
            }
        }
        Ok(())
    }
}
