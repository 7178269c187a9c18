//! Configuration system for the dual-broker session controller
//!
//! Loads a TOML file describing the device, the primary broker, the optional
//! reserved broker, session tuning, status publishing and initial signals.
//! Credentials are never stored in the file: it names environment variables
//! that are resolved when broker profiles are built.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    pub device: DeviceSection,
    pub primary: BrokerSection,
    /// Reserved broker (optional). Absent means single-broker operation.
    pub reserved: Option<BrokerSection>,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub status: StatusSection,
    #[serde(default)]
    pub signals: SignalsSection,
}

/// Device identity used to build topics and client ids
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Location segment placed in front of the device id in topics
    #[serde(default)]
    pub location: Option<String>,
}

/// How the broker host is reached
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Internet broker, usable only while internet is reachable
    #[default]
    Remote,
    /// LAN broker at a fixed address, usable without internet
    Local,
    /// LAN broker running on the network gateway; host comes from link-up
    Gateway,
}

/// Broker section, one per slot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL: mqtt://host:port or mqtts://host:port
    pub broker_url: String,
    #[serde(default)]
    pub kind: BrokerKind,
    /// PEM file with the CA bundle for mqtts:// brokers (system roots when absent)
    pub ca_file: Option<PathBuf>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Fixed client id; generated from the device id when absent
    pub client_id: Option<String>,
    /// Namespace prepended to device topics on this broker
    pub topic_prefix: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_network_timeout")]
    pub network_timeout_ms: u64,
    #[serde(default = "default_reconnect_timeout")]
    pub reconnect_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_true")]
    pub clean_session: bool,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_network_timeout() -> u64 {
    10_000
}

fn default_reconnect_timeout() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

/// Session tuning shared by both slots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Failed connection attempts before the active broker is declared unavailable
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Minutes on the reserved broker before primary is re-probed (0 disables)
    #[serde(default = "default_back_to_primary")]
    pub back_to_primary_minutes: u32,
    /// Quiescence delay between stopping one session and starting the next
    #[serde(default = "default_switch_delay")]
    pub switch_delay_ms: u64,
    /// Largest fragment the transport delivers in one callback
    #[serde(default = "default_read_buffer")]
    pub read_buffer_size: usize,
    /// Largest inbound message the reassembler will buffer
    #[serde(default = "default_max_message")]
    pub max_message_size: usize,
    /// Queued (non-forced) publishes held between flushes
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    #[serde(default = "default_outbox_flush")]
    pub outbox_flush_ms: u64,
    /// Topics subscribed after every successful connection
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_back_to_primary() -> u32 {
    60
}

fn default_switch_delay() -> u64 {
    1000
}

fn default_read_buffer() -> usize {
    1024
}

fn default_max_message() -> usize {
    64 * 1024
}

fn default_outbox_capacity() -> usize {
    64
}

fn default_outbox_flush() -> u64 {
    100
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            connect_attempts: default_connect_attempts(),
            back_to_primary_minutes: default_back_to_primary(),
            switch_delay_ms: default_switch_delay(),
            read_buffer_size: default_read_buffer(),
            max_message_size: default_max_message(),
            outbox_capacity: default_outbox_capacity(),
            outbox_flush_ms: default_outbox_flush(),
            subscriptions: Vec::new(),
        }
    }
}

/// Device status publishing (online message and last-will)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSection {
    /// Leaf segment of the status topic
    #[serde(default = "default_status_topic")]
    pub topic: String,
    /// Drop prefix and location from the status topic
    #[serde(default)]
    pub local_naming: bool,
    /// Publish the online payload after each connection
    #[serde(default = "default_true")]
    pub online: bool,
    #[serde(default = "default_online_payload")]
    pub online_payload: String,
    /// Register the offline payload as last-will
    #[serde(default = "default_true")]
    pub last_will: bool,
    #[serde(default = "default_offline_payload")]
    pub offline_payload: String,
    #[serde(default = "default_status_qos")]
    pub qos: u8,
    #[serde(default = "default_true")]
    pub retained: bool,
}

fn default_status_topic() -> String {
    "status".to_string()
}

fn default_online_payload() -> String {
    "online".to_string()
}

fn default_offline_payload() -> String {
    "offline".to_string()
}

fn default_status_qos() -> u8 {
    1
}

impl Default for StatusSection {
    fn default() -> Self {
        Self {
            topic: default_status_topic(),
            local_naming: false,
            online: true,
            online_payload: default_online_payload(),
            last_will: true,
            offline_payload: default_offline_payload(),
            qos: default_status_qos(),
            retained: true,
        }
    }
}

/// Signals injected by the runner at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SignalsSection {
    /// Report link-up immediately (no external link monitor)
    #[serde(default)]
    pub assume_link_up: bool,
    /// Report internet as reachable immediately (no external reachability probe)
    #[serde(default)]
    pub assume_internet: bool,
    /// Gateway address announced with the initial link-up
    pub gateway: Option<std::net::IpAddr>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Failed to read CA bundle {path}: {source}")]
    CaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LinkConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)?;

        self.primary.validate("primary")?;
        if let Some(reserved) = &self.reserved {
            reserved.validate("reserved")?;
        }

        if self.session.connect_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.connect_attempts must be greater than 0".to_string(),
            ));
        }
        // Without auto-reconnect a session makes exactly one attempt
        let no_retry = std::iter::once(&self.primary)
            .chain(self.reserved.as_ref())
            .any(|section| !section.auto_reconnect);
        if no_retry && self.session.connect_attempts != 1 {
            return Err(ConfigError::InvalidConfig(
                "auto_reconnect = false requires session.connect_attempts = 1".to_string(),
            ));
        }
        if self.session.read_buffer_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.read_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.session.outbox_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.outbox_capacity must be greater than 0".to_string(),
            ));
        }
        if self.status.qos > 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "status.qos must be 0, 1 or 2, got {}",
                self.status.qos
            )));
        }
        if self.status.topic.trim_matches('/').is_empty() {
            return Err(ConfigError::InvalidConfig(
                "status.topic must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether a reserved broker is configured
    pub fn has_reserved(&self) -> bool {
        self.reserved.is_some()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"
location = "lab"

[primary]
broker_url = "mqtt://primary.local:1883"

[reserved]
broker_url = "mqtts://reserved.example.com"

[session]
connect_attempts = 3
back_to_primary_minutes = 5
switch_delay_ms = 0
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

impl BrokerSection {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        self.parsed_url()?;
        if self.password_env.is_some() && self.username_env.is_none() {
            return Err(ConfigError::InvalidConfig(format!(
                "{name}.password_env requires {name}.username_env"
            )));
        }
        Ok(())
    }

    /// Parse the broker URL and extract host, port and TLS flag
    pub fn parsed_url(&self) -> Result<(String, u16, bool), ConfigError> {
        let url = Url::parse(&self.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(ConfigError::InvalidBrokerUrl(self.broker_url.clone())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?;
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok((host.to_string(), port, tls))
    }

    /// Get username from the configured environment variable
    ///
    /// `None` when no variable is configured; a configured but unset
    /// variable is an error.
    pub fn username(&self) -> Result<Option<String>, ConfigError> {
        get_env_var_if_configured(self.username_env.as_deref())
    }

    /// Get password from the configured environment variable
    pub fn password(&self) -> Result<Option<String>, ConfigError> {
        get_env_var_if_configured(self.password_env.as_deref())
    }
}

fn get_env_var_if_configured(env_var_name: Option<&str>) -> Result<Option<String>, ConfigError> {
    env_var_name.map(get_env_var_required).transpose()
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

/// Validate device ID format
fn validate_device_id(device_id: &str) -> Result<(), ConfigError> {
    let valid_chars = device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if device_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidDeviceId(format!(
            "Device ID '{device_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
