//! Broker slots and the immutable profile describing each broker

use crate::config::{BrokerKind, BrokerSection, ConfigError, LinkConfig};
use crate::protocol::{QosLevel, TopicBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// One of the two candidate brokers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Primary,
    Reserved,
}

impl Slot {
    pub fn is_primary(self) -> bool {
        matches!(self, Slot::Primary)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Primary => "primary",
            Slot::Reserved => "reserved",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the broker host comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerHost {
    /// Fixed host name or address from configuration
    Named(String),
    /// The LAN gateway announced by the most recent link-up
    Gateway,
}

/// Transport security for the broker connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Security {
    Tcp,
    /// TLS with an explicit CA bundle, or the platform roots when `None`
    Tls { ca_pem: Option<Vec<u8>> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Message the broker publishes on the device's behalf after an unclean drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub qos: QosLevel,
    pub retain: bool,
}

/// Immutable description of one broker, built once per slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerProfile {
    pub slot: Slot,
    pub host: BrokerHost,
    pub port: u16,
    pub security: Security,
    pub credentials: Option<Credentials>,
    pub client_id: String,
    pub keep_alive: Duration,
    pub network_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub auto_reconnect: bool,
    pub clean_session: bool,
    pub read_buffer_size: usize,
    pub max_message_size: usize,
    pub last_will: Option<LastWill>,
    /// Reachable without internet (LAN or gateway broker)
    pub local: bool,
}

impl BrokerProfile {
    /// Build the profile for `slot` from its configuration section
    pub fn from_config(
        slot: Slot,
        section: &BrokerSection,
        config: &LinkConfig,
    ) -> Result<Self, ConfigError> {
        let (url_host, port, tls) = section.parsed_url()?;

        let host = match section.kind {
            BrokerKind::Gateway => BrokerHost::Gateway,
            BrokerKind::Remote | BrokerKind::Local => BrokerHost::Named(url_host),
        };

        let security = if tls {
            let ca_pem = match &section.ca_file {
                Some(path) => Some(std::fs::read(path).map_err(|source| ConfigError::CaFile {
                    path: path.clone(),
                    source,
                })?),
                None => None,
            };
            Security::Tls { ca_pem }
        } else {
            Security::Tcp
        };

        // A username without a password is allowed, the reverse is rejected by validation
        let password = section.password()?;
        let credentials = section.username()?.map(|username| Credentials {
            username,
            password: password.unwrap_or_default(),
        });

        let client_id = section
            .client_id
            .clone()
            .unwrap_or_else(|| generate_client_id(&config.device.id));

        let last_will = config.status.last_will.then(|| LastWill {
            topic: TopicBuilder::device_status_topic(config, slot),
            payload: config.status.offline_payload.clone(),
            qos: QosLevel::from_level(config.status.qos),
            retain: config.status.retained,
        });

        Ok(Self {
            slot,
            host,
            port,
            security,
            credentials,
            client_id,
            keep_alive: Duration::from_secs(section.keep_alive_secs),
            network_timeout: Duration::from_millis(section.network_timeout_ms),
            reconnect_timeout: Duration::from_millis(section.reconnect_timeout_ms),
            auto_reconnect: section.auto_reconnect,
            clean_session: section.clean_session,
            read_buffer_size: config.session.read_buffer_size,
            max_message_size: config.session.max_message_size,
            last_will,
            local: section.kind != BrokerKind::Remote,
        })
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.security, Security::Tls { .. })
    }

    /// Resolve the host to connect to; `None` for a gateway broker before any link-up
    pub fn resolve_host(&self, gateway: Option<IpAddr>) -> Option<String> {
        match &self.host {
            BrokerHost::Named(host) => Some(host.clone()),
            BrokerHost::Gateway => gateway.map(|ip| ip.to_string()),
        }
    }
}

/// Profiles for both slots; the reserved one is optional
#[derive(Debug, Clone)]
pub struct SlotProfiles {
    pub primary: BrokerProfile,
    pub reserved: Option<BrokerProfile>,
}

impl SlotProfiles {
    pub fn from_config(config: &LinkConfig) -> Result<Self, ConfigError> {
        let primary = BrokerProfile::from_config(Slot::Primary, &config.primary, config)?;
        let reserved = config
            .reserved
            .as_ref()
            .map(|section| BrokerProfile::from_config(Slot::Reserved, section, config))
            .transpose()?;
        Ok(Self { primary, reserved })
    }

    pub fn get(&self, slot: Slot) -> Option<&BrokerProfile> {
        match slot {
            Slot::Primary => Some(&self.primary),
            Slot::Reserved => self.reserved.as_ref(),
        }
    }
}

/// Generate a unique client id so two sessions never collide at the broker
fn generate_client_id(device_id: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{device_id}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_slot_helpers() {
        assert!(Slot::Primary.is_primary());
        assert!(!Slot::Reserved.is_primary());
        assert_eq!(Slot::Primary.other(), Slot::Reserved);
        assert_eq!(Slot::Reserved.other(), Slot::Primary);
        assert_eq!(Slot::Reserved.to_string(), "reserved");
    }

    #[test]
    fn test_profiles_from_test_config() {
        let config = LinkConfig::test_config();
        let profiles = SlotProfiles::from_config(&config).unwrap();

        assert_eq!(
            profiles.primary.host,
            BrokerHost::Named("primary.local".to_string())
        );
        assert_eq!(profiles.primary.port, 1883);
        assert_eq!(profiles.primary.security, Security::Tcp);
        assert!(!profiles.primary.is_local());

        let reserved = profiles.get(Slot::Reserved).unwrap();
        assert!(reserved.is_tls());
        assert_eq!(reserved.port, 8883);
        assert_eq!(reserved.slot, Slot::Reserved);
    }

    #[test]
    fn test_generated_client_id_is_unique() {
        let config = LinkConfig::test_config();
        let a = BrokerProfile::from_config(Slot::Primary, &config.primary, &config).unwrap();
        let b = BrokerProfile::from_config(Slot::Primary, &config.primary, &config).unwrap();
        assert!(a.client_id.starts_with("test-device-"));
        assert_ne!(a.client_id, b.client_id);
    }

    #[test]
    fn test_last_will_uses_status_topic() {
        let config = LinkConfig::test_config();
        let profile = BrokerProfile::from_config(Slot::Primary, &config.primary, &config).unwrap();
        let will = profile.last_will.unwrap();
        assert_eq!(will.topic, "lab/test-device/status");
        assert_eq!(will.payload, "offline");
        assert!(will.retain);
    }

    #[test]
    fn test_last_will_disabled() {
        let mut config = LinkConfig::test_config();
        config.status.last_will = false;
        let profile = BrokerProfile::from_config(Slot::Primary, &config.primary, &config).unwrap();
        assert!(profile.last_will.is_none());
    }

    #[test]
    fn test_gateway_host_resolution() {
        let mut config = LinkConfig::test_config();
        config.primary.kind = BrokerKind::Gateway;
        let profile = BrokerProfile::from_config(Slot::Primary, &config.primary, &config).unwrap();

        assert!(profile.is_local());
        assert_eq!(profile.resolve_host(None), None);
        assert_eq!(
            profile.resolve_host(Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)))),
            Some("192.168.1.1".to_string())
        );
    }

    #[test]
    fn test_missing_ca_file_is_config_error() {
        let mut config = LinkConfig::test_config();
        let reserved = config.reserved.as_mut().unwrap();
        reserved.ca_file = Some("/nonexistent/ca.pem".into());
        let result = SlotProfiles::from_config(&config);
        assert!(matches!(result, Err(ConfigError::CaFile { .. })));
    }
}
