//! Pure translation of a broker profile into rumqttc options

use crate::broker::{BrokerProfile, Security};
use crate::protocol::QosLevel;
use rumqttc::v5::mqttbytes::v5::LastWill as MqttLastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;

/// rumqttc refuses keep-alive intervals shorter than this
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

pub fn to_qos(level: QosLevel) -> QoS {
    match level {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Build rumqttc options for `profile` connecting to `host`
pub fn configure_mqtt_options(profile: &BrokerProfile, host: &str) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(profile.client_id.clone(), host, profile.port);

    match &profile.security {
        Security::Tcp => {}
        Security::Tls { ca_pem: Some(ca) } => {
            mqtt_options.set_transport(RumqttcTransport::tls(ca.clone(), None, None));
        }
        Security::Tls { ca_pem: None } => {
            mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
        }
    }

    if let Some(credentials) = &profile.credentials {
        mqtt_options.set_credentials(
            credentials.username.clone(),
            credentials.password.clone(),
        );
    }

    mqtt_options.set_keep_alive(profile.keep_alive.max(MIN_KEEP_ALIVE));
    mqtt_options.set_clean_start(profile.clean_session);
    mqtt_options.set_connection_timeout(profile.network_timeout.as_secs().max(1));
    mqtt_options.set_max_packet_size(Some(
        u32::try_from(profile.max_message_size).unwrap_or(u32::MAX),
    ));

    if let Some(will) = &profile.last_will {
        // MQTT v5 LastWill takes 5 parameters: topic, payload, qos, retain, properties
        let lwt = MqttLastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            to_qos(will.qos),
            will.retain,
            None,
        );
        mqtt_options.set_last_will(lwt);
    }

    mqtt_options
}
