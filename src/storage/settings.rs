//! Chat configuration

use crate::connection::ConnectionConfig;
use crate::storage::message::{Contact, User};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder substituted with the user ID in `inbound_destination`
pub const USER_ID_PLACEHOLDER: &str = "{user_id}";

/// Chat configuration
///
/// Stored as JSON; missing fields take their defaults and a missing or empty
/// file yields the default configuration.
///
/// # Example
/// ```rust,no_run
/// use forum_chat::storage::ChatConfig;
///
/// let mut config = ChatConfig::load("chat.json").expect("Failed to load");
/// config.max_connect_attempts = 5;
/// config.save("chat.json").expect("Failed to save");
/// println!("Broker: {}", config.broker_url);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// STOMP-over-WebSocket endpoint
    pub broker_url: String,
    /// Base URL of the forum REST API
    pub api_base_url: String,
    /// Destination outgoing messages are published to
    pub publish_destination: String,
    /// Per-user inbound destination; must contain `{user_id}`
    pub inbound_destination: String,
    /// Broker handshake timeout in milliseconds
    pub handshake_timeout_ms: u64,
    /// History request timeout in milliseconds
    pub fetch_timeout_ms: u64,
    /// Connection attempts before giving up
    pub max_connect_attempts: u32,
    /// Base delay for retry backoff in milliseconds
    pub retry_base_delay_ms: u64,
    /// Heart-beat interval announced to the broker in milliseconds
    pub heartbeat_ms: u64,
    /// Signed-in user for the terminal client
    pub user: Option<User>,
    /// Contacts offered by the terminal client
    pub contacts: Vec<Contact>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            broker_url: "ws://localhost:8080/ws".to_string(),
            api_base_url: "http://localhost:8080".to_string(),
            publish_destination: "/app/chat".to_string(),
            inbound_destination: "/user/{user_id}/queue/messages".to_string(),
            handshake_timeout_ms: 10_000,
            fetch_timeout_ms: 10_000,
            max_connect_attempts: 3,
            retry_base_delay_ms: 1000,
            heartbeat_ms: 10_000,
            user: None,
            contacts: Vec::new(),
        }
    }
}

impl ChatConfig {
    /// Load configuration from a JSON file
    ///
    /// Returns the defaults if the file doesn't exist or is empty.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty JSON, creating parent directories
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, json)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Reject values the chat layer cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout_ms == 0 || self.fetch_timeout_ms == 0 {
            return Err(Error::Config("Timeouts must be greater than zero".to_string()));
        }
        if self.max_connect_attempts == 0 {
            return Err(Error::Config(
                "max_connect_attempts must be at least 1".to_string(),
            ));
        }
        if !self.inbound_destination.contains(USER_ID_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "inbound_destination must contain {}",
                USER_ID_PLACEHOLDER
            )));
        }
        if self.publish_destination.trim().is_empty() {
            return Err(Error::Config("publish_destination is empty".to_string()));
        }
        Ok(())
    }

    /// History request timeout
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Connection manager settings
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            max_attempts: self.max_connect_attempts,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            heartbeat: Duration::from_millis(self.heartbeat_ms),
        }
    }
}
