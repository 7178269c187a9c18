//! Wire-independent protocol types: lifecycle events, QoS levels and topics

pub mod events;
pub mod qos;
pub mod topics;

pub use events::{IncomingMessage, LifecycleEvent};
pub use qos::QosLevel;
pub use topics::{canonicalize_topic, TopicBuilder};
