//! Pure mapping from rumqttc events to transport callbacks
//!
//! Inbound publishes are split into fragments no larger than the profile's
//! read-buffer size, the same shape an embedded MQTT client delivers, so the
//! controller's reassembler sees one code path for every transport.

use crate::transport::{Fragment, TransportEventKind, TransportFault};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{ConnectionError, Event};

/// Translate one polled event; most infrastructure packets map to nothing
pub fn map_event(event: &Event, chunk_size: usize) -> Vec<TransportEventKind> {
    let Event::Incoming(incoming) = event else {
        return Vec::new();
    };

    match incoming {
        Packet::ConnAck(_) => vec![TransportEventKind::Connected],
        Packet::Publish(publish) => {
            let topic = String::from_utf8_lossy(&publish.topic).into_owned();
            split_payload(&topic, &publish.payload, chunk_size)
                .into_iter()
                .map(TransportEventKind::Data)
                .collect()
        }
        Packet::SubAck(suback) => vec![TransportEventKind::Subscribed {
            message_id: u32::from(suback.pkid),
        }],
        Packet::UnsubAck(unsuback) => vec![TransportEventKind::Unsubscribed {
            message_id: u32::from(unsuback.pkid),
        }],
        Packet::PubAck(puback) => vec![TransportEventKind::Published {
            message_id: u32::from(puback.pkid),
        }],
        Packet::PubComp(pubcomp) => vec![TransportEventKind::Published {
            message_id: u32::from(pubcomp.pkid),
        }],
        Packet::Disconnect(_) => vec![TransportEventKind::Disconnected],
        _ => Vec::new(),
    }
}

/// Cut a payload into sequential fragments of at most `chunk_size` bytes
pub fn split_payload(topic: &str, payload: &Bytes, chunk_size: usize) -> Vec<Fragment> {
    let total_len = payload.len();
    if total_len == 0 {
        return vec![Fragment {
            topic: topic.to_string(),
            offset: 0,
            total_len: 0,
            data: Bytes::new(),
        }];
    }

    let chunk_size = chunk_size.max(1);
    (0..total_len)
        .step_by(chunk_size)
        .map(|offset| {
            let end = (offset + chunk_size).min(total_len);
            Fragment {
                topic: topic.to_string(),
                offset,
                total_len,
                data: payload.slice(offset..end),
            }
        })
        .collect()
}

/// Capture the structured detail of an event loop error
pub fn map_error(error: &ConnectionError) -> TransportFault {
    match error {
        ConnectionError::Io(io) => TransportFault::Transport {
            sock_errno: io.raw_os_error(),
            tls_error: None,
            detail: io.to_string(),
        },
        ConnectionError::Tls(tls) => TransportFault::Transport {
            sock_errno: None,
            tls_error: Some(tls.to_string()),
            detail: "TLS handshake failed".to_string(),
        },
        ConnectionError::ConnectionRefused(code) => TransportFault::ConnectionRefused {
            code: format!("{code:?}"),
        },
        ConnectionError::Timeout(_) => TransportFault::Transport {
            sock_errno: None,
            tls_error: None,
            detail: error.to_string(),
        },
        other => TransportFault::Unknown {
            kind: other.to_string(),
        },
    }
}
