//! Broker slots, availability tracking and failover
//!
//! - [`profile`] - Immutable broker descriptions built from configuration
//! - [`availability`] - Edge-triggered availability flags and slot selection
//! - [`failover`] - Lifecycle state machine driving the transport

pub mod availability;
pub mod failover;
pub mod profile;

pub use availability::{AvailabilityTracker, AvailabilityUpdate, Selection};
pub use failover::{BackToPrimaryTimer, Endpoint, FailoverController, FailoverState, Transition};
pub use profile::{BrokerHost, BrokerProfile, Credentials, LastWill, Security, Slot, SlotProfiles};
