//! Testing utilities and mock implementations
//!
//! Mocks for the transport and the event bus so the controller can be
//! exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
