//! Configuration for detect-relay
//!
//! Loaded from TOML. Every section and field has a default, so an empty file
//! (or no file at all) yields a working local setup.

use crate::session::client::{SessionConfig, DEFAULT_TOPIC};
use crate::session::state::{ReconnectPolicy, DEFAULT_RECONNECT_INTERVAL};
use crate::transport::endpoint::{BrokerEndpoint, DEFAULT_PORT};
use crate::transport::mqtt::{ConnectorOptions, DEFAULT_MAX_PACKET_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerSection,
    pub reconnect: ReconnectSection,
    pub serial: SerialSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    /// `mqtt://host:port`; overrides `host` and `port` when set
    pub url: Option<String>,
    pub keep_alive_secs: u64,
    pub default_topic: String,
    /// Generated per connection when absent
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    pub qos: u8,
    pub clean_session: bool,
    /// Largest MQTT packet in bytes; bigger publishes are refused locally
    pub max_packet_size: usize,
}

/// Smallest accepted `broker.max_packet_size`
pub const MIN_PACKET_SIZE: usize = 128;

/// Read timeout of the serial device, matching a one second poll
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 1000;

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            url: None,
            keep_alive_secs: 60,
            default_topic: DEFAULT_TOPIC.to_string(),
            client_id: None,
            username_env: None,
            password_env: None,
            qos: 0,
            clean_session: true,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Reconnection backoff strategy selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSection {
    pub strategy: BackoffKind,
    pub interval_secs: u64,
    /// Cap for the exponential strategy
    pub max_interval_secs: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            strategy: BackoffKind::Fixed,
            interval_secs: DEFAULT_RECONNECT_INTERVAL.as_secs(),
            max_interval_secs: 60,
        }
    }
}

impl ReconnectSection {
    pub fn policy(&self) -> ReconnectPolicy {
        let interval = Duration::from_secs(self.interval_secs);
        match self.strategy {
            BackoffKind::Fixed => ReconnectPolicy::fixed(interval),
            BackoffKind::Exponential => {
                ReconnectPolicy::exponential(interval, Duration::from_secs(self.max_interval_secs))
            }
        }
    }
}

/// Upstream token source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialSection {
    pub device: String,
    /// Line speed applied when the device is opened (8N1)
    pub baud_rate: u32,
    /// How long a single read waits for data
    pub timeout_ms: u64,
    /// Defaults to the broker's default topic
    pub topic: Option<String>,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            device: "/dev/ttyAMA0".to_string(),
            baud_rate: 115_200,
            timeout_ms: DEFAULT_SERIAL_TIMEOUT_MS,
            topic: None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Resolves the URL override, if any
        self.endpoint()?;

        if self.broker.qos > 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.qos must be 0, 1 or 2, got {}",
                self.broker.qos
            )));
        }
        if self.broker.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.keep_alive_secs must be at least 1".to_string(),
            ));
        }
        if let Some(client_id) = &self.broker.client_id {
            if client_id.is_empty() || client_id.starts_with(char::is_whitespace) {
                return Err(ConfigError::InvalidConfig(format!(
                    "broker.client_id must be non-empty and not start with whitespace, got {client_id:?}"
                )));
            }
        }
        if self.broker.max_packet_size < MIN_PACKET_SIZE {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.max_packet_size must be at least {MIN_PACKET_SIZE}, got {}",
                self.broker.max_packet_size
            )));
        }
        crate::session::topic::validate_publish_topic(&self.broker.default_topic)
            .map_err(|e| ConfigError::InvalidConfig(format!("broker.default_topic: {e}")))?;
        if let Some(topic) = &self.serial.topic {
            crate::session::topic::validate_publish_topic(topic)
                .map_err(|e| ConfigError::InvalidConfig(format!("serial.topic: {e}")))?;
        }
        if self.serial.device.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "serial.device must not be empty".to_string(),
            ));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::InvalidConfig(
                "serial.baud_rate must be positive".to_string(),
            ));
        }
        if self.reconnect.interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.reconnect.strategy == BackoffKind::Exponential
            && self.reconnect.max_interval_secs < self.reconnect.interval_secs
        {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_interval_secs must not be below reconnect.interval_secs"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Broker endpoint, honoring the URL override
    pub fn endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        let keep_alive = Duration::from_secs(self.broker.keep_alive_secs);
        let Some(raw) = &self.broker.url else {
            if self.broker.host.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "broker.host must not be empty".to_string(),
                ));
            }
            return Ok(BrokerEndpoint::new(
                self.broker.host.clone(),
                self.broker.port,
                keep_alive,
            ));
        };

        let url = Url::parse(raw).map_err(|_| ConfigError::InvalidBrokerUrl(raw.clone()))?;
        if !matches!(url.scheme(), "mqtt" | "tcp") {
            return Err(ConfigError::InvalidBrokerUrl(format!(
                "{raw} (only mqtt:// and tcp:// are supported)"
            )));
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(raw.clone()))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        Ok(BrokerEndpoint::new(host, port, keep_alive))
    }

    /// Session settings for [`MqttSession::new`](crate::session::MqttSession::new)
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        Ok(SessionConfig {
            endpoint: self.endpoint()?,
            default_topic: self.broker.default_topic.clone(),
            reconnect: self.reconnect.policy(),
        })
    }

    /// Connector settings, with credentials resolved from the environment now
    pub fn connector_options(&self) -> ConnectorOptions {
        let credentials = match (self.get_mqtt_username(), self.get_mqtt_password()) {
            (Some(username), password) => Some((username, password.unwrap_or_default())),
            (None, _) => None,
        };

        ConnectorOptions {
            client_id: self.broker.client_id.clone(),
            credentials,
            qos: self.broker.qos,
            clean_session: self.broker.clean_session,
            max_packet_size: self.broker.max_packet_size,
            ..Default::default()
        }
    }

    /// Topic for forwarded tokens
    pub fn serial_topic(&self) -> &str {
        self.serial
            .topic
            .as_deref()
            .unwrap_or(&self.broker.default_topic)
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
    }
}
