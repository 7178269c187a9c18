//! Lifecycle events posted on the event bus

use crate::broker::Slot;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A complete inbound message after fragment reassembly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl IncomingMessage {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Events broadcast by the connection controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Connected {
        slot: Slot,
        host: String,
        port: u16,
    },
    ConnectionLost {
        slot: Slot,
        host: String,
        port: u16,
    },
    ConnectionFailed {
        slot: Slot,
        host: String,
        port: u16,
        attempts: u32,
    },
    IncomingMessage(IncomingMessage),
    /// Posted on the clear-to-set edge of the error latch
    Error { message: String },
    /// Posted on the set-to-clear edge of the error latch
    ErrorCleared,
    PrimarySelected,
    ReservedSelected,
    /// A transport lifecycle call failed; the controller cannot recover alone
    SystemFault { message: String },
}

impl LifecycleEvent {
    pub fn selected(slot: Slot) -> Self {
        match slot {
            Slot::Primary => LifecycleEvent::PrimarySelected,
            Slot::Reserved => LifecycleEvent::ReservedSelected,
        }
    }

    /// Short name used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::Connected { .. } => "connected",
            LifecycleEvent::ConnectionLost { .. } => "connection_lost",
            LifecycleEvent::ConnectionFailed { .. } => "connection_failed",
            LifecycleEvent::IncomingMessage(_) => "incoming_message",
            LifecycleEvent::Error { .. } => "error",
            LifecycleEvent::ErrorCleared => "error_cleared",
            LifecycleEvent::PrimarySelected => "primary_selected",
            LifecycleEvent::ReservedSelected => "reserved_selected",
            LifecycleEvent::SystemFault { .. } => "system_fault",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = LifecycleEvent::Connected {
            slot: Slot::Reserved,
            host: "broker".to_string(),
            port: 8883,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "connected");
        assert_eq!(json["slot"], "reserved");
        assert_eq!(json["port"], 8883);
    }

    #[test]
    fn test_unit_variant_serialization() {
        let json = serde_json::to_string(&LifecycleEvent::ErrorCleared).unwrap();
        assert_eq!(json, r#"{"event":"error_cleared"}"#);
    }

    #[test]
    fn test_selected_helper() {
        assert_eq!(
            LifecycleEvent::selected(Slot::Primary),
            LifecycleEvent::PrimarySelected
        );
        assert_eq!(LifecycleEvent::selected(Slot::Reserved).kind(), "reserved_selected");
    }

    #[test]
    fn test_payload_str() {
        let message = IncomingMessage {
            topic: "a/b".to_string(),
            payload: Bytes::from_static(b"hello"),
        };
        assert_eq!(message.payload_str(), Some("hello"));
    }
}
