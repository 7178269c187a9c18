//! Session control: the connection controller and its building blocks
//!
//! - [`controller`] - Facade dispatching signals and transport callbacks
//! - [`reassembly`] - Rebuilds inbound messages from fragments
//! - [`latch`] - Edge-triggered error flag
//! - [`outbox`] - Topic-coalescing queue for non-forced publishes
//! - [`runner`] - Actor task owning the controller

pub mod controller;
pub mod latch;
pub mod outbox;
pub mod reassembly;
pub mod runner;

pub use controller::{describe_payload, ConnectionController, SessionInfo, Signal, LOG_PAYLOAD_LIMIT};
pub use latch::ErrorLatch;
pub use outbox::{EnqueueOutcome, OutgoingMessage, Outbox};
pub use reassembly::{FragmentOutcome, Reassembler};
pub use runner::{spawn, ControllerHandle};
