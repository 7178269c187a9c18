//! MQTT transport built on rumqttc
//!
//! The module keeps pure functions apart from I/O:
//!
//! - [`options`] - Pure translation of a broker profile into client options
//! - [`event_map`] - Pure mapping of polled events and errors to callbacks
//! - [`client`] - Impure session lifecycle and the event loop task
//!
//! # Usage
//!
//! ```rust,no_run
//! use brokerlink::broker::{BrokerProfile, Slot};
//! use brokerlink::config::LinkConfig;
//! use brokerlink::transport::mqtt::RumqttTransport;
//! use brokerlink::transport::{EventSink, Transport, TransportSession};
//! use std::path::Path;
//!
//! # tokio_test::block_on(async {
//! let config = LinkConfig::load_from_file(Path::new("brokerlink.toml"))?;
//! let profile = BrokerProfile::from_config(Slot::Primary, &config.primary, &config)?;
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! let mut transport = RumqttTransport::default();
//! let mut session = transport
//!     .configure(&profile, "broker.local", EventSink::new(1, tx))
//!     .await?;
//! session.start().await?;
//! while let Some(event) = rx.recv().await {
//!     println!("{:?}", event.kind);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod event_map;
pub mod options;

pub use client::{RumqttSession, RumqttTransport};
pub use event_map::{map_error, map_event, split_payload};
pub use options::configure_mqtt_options;
