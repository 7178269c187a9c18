//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use brokerlink::broker::{BrokerHost, Security, Slot, SlotProfiles};
use brokerlink::config::{BrokerKind, ConfigError, LinkConfig};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[device]
id = "sensor-7"
location = "plant/north"

[primary]
broker_url = "mqtts://broker.example.com"
keep_alive_secs = 30

[reserved]
broker_url = "mqtt://10.0.0.5:1884"
kind = "local"

[session]
connect_attempts = 5
back_to_primary_minutes = 15
subscriptions = ["plant/north/sensor-7/cmd/#"]

[status]
topic = "state"
online_payload = "up"
offline_payload = "down"

[signals]
assume_link_up = true
assume_internet = true
"#,
    );

    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.id, "sensor-7");
    assert_eq!(config.primary.keep_alive_secs, 30);
    assert_eq!(config.reserved.as_ref().unwrap().kind, BrokerKind::Local);
    assert_eq!(config.session.connect_attempts, 5);
    assert_eq!(config.session.subscriptions.len(), 1);
    assert_eq!(config.status.online_payload, "up");
    assert!(config.signals.assume_link_up);
    assert!(config.signals.gateway.is_none());
}

#[test]
fn test_profiles_built_from_loaded_config() {
    let temp_file = write_config(
        r#"
[device]
id = "sensor-7"

[primary]
broker_url = "mqtts://broker.example.com"

[reserved]
broker_url = "mqtt://gw:1883"
kind = "gateway"
"#,
    );
    let config = LinkConfig::load_from_file(temp_file.path()).unwrap();
    let profiles = SlotProfiles::from_config(&config).unwrap();

    assert_eq!(profiles.primary.port, 8883);
    assert_eq!(profiles.primary.security, Security::Tls { ca_pem: None });
    assert!(!profiles.primary.is_local());
    assert!(profiles.primary.client_id.starts_with("sensor-7-"));

    let reserved = profiles.get(Slot::Reserved).unwrap();
    assert_eq!(reserved.host, BrokerHost::Gateway);
    assert!(reserved.is_local());
    assert!(reserved.resolve_host(None).is_none());
}

#[test]
fn test_ca_file_is_read_for_tls_broker() {
    let ca = write_config("-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n");
    let config = LinkConfig::parse(&format!(
        r#"
[device]
id = "sensor-7"

[primary]
broker_url = "mqtts://broker.example.com"
ca_file = "{}"
"#,
        ca.path().display()
    ))
    .unwrap();

    let profiles = SlotProfiles::from_config(&config).unwrap();
    match &profiles.primary.security {
        Security::Tls { ca_pem: Some(pem) } => {
            assert!(pem.starts_with(b"-----BEGIN CERTIFICATE-----"))
        }
        other => panic!("expected TLS with CA bundle, got {other:?}"),
    }
}

#[test]
fn test_missing_ca_file_is_reported() {
    let config = LinkConfig::parse(
        r#"
[device]
id = "sensor-7"

[primary]
broker_url = "mqtts://broker.example.com"
ca_file = "/nonexistent/brokerlink-ca.pem"
"#,
    )
    .unwrap();

    assert!(matches!(
        SlotProfiles::from_config(&config),
        Err(ConfigError::CaFile { .. })
    ));
}

#[test]
fn test_missing_file_is_read_error() {
    let result = LinkConfig::load_from_file(std::path::Path::new("/nonexistent/brokerlink.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[device\nid = ");
    assert!(matches!(
        LinkConfig::load_from_file(temp_file.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_missing_primary_section_rejected() {
    let temp_file = write_config(
        r#"
[device]
id = "sensor-7"
"#,
    );
    assert!(LinkConfig::load_from_file(temp_file.path()).is_err());
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let temp_file = write_config(
        r#"
[device]
id = "sensor 7"

[primary]
broker_url = "mqtt://localhost"
"#,
    );
    assert!(matches!(
        LinkConfig::load_from_file(temp_file.path()),
        Err(ConfigError::InvalidDeviceId(_))
    ));

    let temp_file = write_config(
        r#"
[device]
id = "sensor-7"

[primary]
broker_url = "not a url"
"#,
    );
    assert!(matches!(
        LinkConfig::load_from_file(temp_file.path()),
        Err(ConfigError::InvalidBrokerUrl(_))
    ));

    let temp_file = write_config(
        r#"
[device]
id = "sensor-7"

[primary]
broker_url = "mqtt://localhost"

[session]
outbox_capacity = 0
"#,
    );
    assert!(matches!(
        LinkConfig::load_from_file(temp_file.path()),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_credentials_come_from_environment() {
    std::env::set_var("BROKERLINK_IT_USER", "device");
    std::env::set_var("BROKERLINK_IT_PASS", "s3cret");
    let config = LinkConfig::parse(
        r#"
[device]
id = "sensor-7"

[primary]
broker_url = "mqtt://localhost"
username_env = "BROKERLINK_IT_USER"
password_env = "BROKERLINK_IT_PASS"
"#,
    )
    .unwrap();

    let profiles = SlotProfiles::from_config(&config).unwrap();
    let credentials = profiles.primary.credentials.unwrap();
    assert_eq!(credentials.username, "device");
    assert_eq!(credentials.password, "s3cret");

    std::env::remove_var("BROKERLINK_IT_USER");
    std::env::remove_var("BROKERLINK_IT_PASS");
}

#[test]
fn test_configured_but_unset_credential_variable_is_an_error() {
    std::env::set_var("BROKERLINK_IT_USER_SET", "device");
    let config = LinkConfig::parse(
        r#"
[device]
id = "sensor-7"

[primary]
broker_url = "mqtt://localhost"
username_env = "BROKERLINK_IT_USER_SET"
password_env = "BROKERLINK_IT_PASS_NEVER_SET"
"#,
    )
    .unwrap();

    match SlotProfiles::from_config(&config) {
        Err(ConfigError::EnvVarNotFound(name)) => assert_eq!(name, "BROKERLINK_IT_PASS_NEVER_SET"),
        other => panic!("expected missing variable error, got {other:?}"),
    }

    let config = LinkConfig::parse(
        r#"
[device]
id = "sensor-7"

[primary]
broker_url = "mqtt://localhost"
username_env = "BROKERLINK_IT_USER_NEVER_SET"
"#,
    )
    .unwrap();
    assert!(matches!(
        SlotProfiles::from_config(&config),
        Err(ConfigError::EnvVarNotFound(_))
    ));

    std::env::remove_var("BROKERLINK_IT_USER_SET");
}

#[test]
fn test_config_round_trips_through_toml_show() {
    let config = LinkConfig::parse(
        r#"
[device]
id = "sensor-7"

[primary]
broker_url = "mqtt://localhost"
"#,
    )
    .unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    assert_eq!(LinkConfig::parse(&rendered).unwrap(), config);
}
