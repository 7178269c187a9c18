//! Error types for the dual-broker session controller
//!
//! Transport errors never cross the callback boundary: runtime faults become
//! latched flags and bus events, lifecycle faults become `SystemFault` events.
//! The variants here are what the controller returns from its own API.

use crate::broker::Slot;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to start session on {slot} broker: {source}")]
    TransportStartup {
        slot: Slot,
        #[source]
        source: TransportError,
    },

    #[error("Transport lifecycle call failed: {0}")]
    TransportLifecycle(#[source] TransportError),

    #[error("Transport runtime error: {message}")]
    TransportRuntime { message: String },

    #[error("Connection to {slot} broker failed after {attempts} attempts")]
    ConnectionExhausted { slot: Slot, attempts: u32 },

    #[error("Cannot buffer inbound message of {total_len} bytes")]
    ReassemblyAllocation { total_len: usize },

    #[error("No broker configured for {slot} slot")]
    SlotNotConfigured { slot: Slot },

    #[error("Controller task has stopped")]
    ControllerClosed,

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl LinkError {
    pub fn transport_startup(slot: Slot, source: TransportError) -> Self {
        Self::TransportStartup { slot, source }
    }

    pub fn transport_runtime<S: Into<String>>(message: S) -> Self {
        Self::TransportRuntime {
            message: message.into(),
        }
    }

    /// Lifecycle failures are fatal to the controller and surface as system faults
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::TransportStartup { .. } | LinkError::TransportLifecycle(_)
        )
    }

    /// Message safe to publish on the event bus
    pub fn sanitized_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("static regex is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("static regex is valid")
});

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Redact credentials and sensitive paths, then cap the length at 500 bytes
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for controller operations
pub type LinkResult<T> = Result<T, LinkError>;
