//! Messaging configuration types for count notifications.

use serde::Deserialize;

use super::storage::RedisConfig;

/// Channel every count envelope is published on, shared by all users.
pub const DEFAULT_MAIN_CHANNEL: &str = "juggernaut";

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process broadcast channel (no external broker).
    #[default]
    Channel,
    /// Redis PUBLISH.
    Redis,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Shared channel name. Consumers demultiplex by the envelope's `channel` field.
    pub main_channel: String,
    /// Redis-specific configuration.
    pub redis: RedisConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            messaging_type: MessagingType::Channel,
            main_channel: DEFAULT_MAIN_CHANNEL.to_string(),
            redis: RedisConfig::default(),
        }
    }
}
