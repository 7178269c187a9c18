//! brokerlink - dual-broker MQTT session controller
//!
//! Keeps one MQTT session alive for a networked device that can reach a
//! primary broker and, optionally, a reserved fallback broker.
//!
//! # Overview
//!
//! - [`broker`] - Broker profiles, availability tracking and the failover state machine
//! - [`session`] - The connection controller, fragment reassembly and its actor task
//! - [`transport`] - The transport seam and its rumqttc implementation
//! - [`bus`] - Lifecycle event delivery
//! - [`config`] - TOML configuration
//!
//! # Quick Start
//!
//! ```rust
//! use brokerlink::broker::{AvailabilityTracker, Selection};
//!
//! // Primary is a remote broker, reserved is on the LAN
//! let mut tracker = AvailabilityTracker::new(false, Some(true));
//! tracker.set_primary_available(true);
//! assert_eq!(tracker.current_selection(), Selection::Reserved);
//!
//! tracker.set_internet_reachable(true);
//! assert_eq!(tracker.current_selection(), Selection::Primary);
//! ```

pub mod broker;
pub mod bus;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use broker::{AvailabilityTracker, FailoverController, Selection, Slot};
pub use bus::{BroadcastBus, EventBus};
pub use config::*;
pub use error::{LinkError, LinkResult};
pub use protocol::*;
pub use session::{ConnectionController, ControllerHandle, Signal};
pub use transport::mqtt::RumqttTransport;
