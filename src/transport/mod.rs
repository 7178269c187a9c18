//! Transport layer abstraction
//!
//! A [`Transport`] turns a broker profile into a [`TransportSession`]. The
//! session is driven through start/stop/suspend/resume by the failover
//! controller and reports what happens on the wire through an [`EventSink`].
//! Every event carries the id of the session that produced it so the
//! controller can drop callbacks that arrive after a session was stopped.

use crate::broker::BrokerProfile;
use crate::protocol::QosLevel;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Monotonic id assigned to each configured session
pub type SessionId = u64;

/// Id returned by publish/subscribe/unsubscribe; 0 for QoS 0 publishes
pub type MessageId = u32;

/// A slice of one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Topic; transports may only fill it on the first fragment
    pub topic: String,
    pub offset: usize,
    pub total_len: usize,
    pub data: Bytes,
}

impl Fragment {
    pub fn is_last(&self) -> bool {
        self.offset + self.data.len() == self.total_len
    }
}

/// Structured detail of a runtime transport error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// Socket or TLS level failure
    Transport {
        sock_errno: Option<i32>,
        tls_error: Option<String>,
        detail: String,
    },
    /// The broker answered the connect with a refusal code
    ConnectionRefused { code: String },
    Unknown { kind: String },
}

impl TransportFault {
    /// Render the fault for logs and bus events
    pub fn describe(&self) -> String {
        match self {
            TransportFault::Transport {
                sock_errno,
                tls_error,
                detail,
            } => {
                let mut message = match sock_errno {
                    Some(errno) => format!("transport error {errno} ({detail})"),
                    None => format!("transport error ({detail})"),
                };
                if let Some(tls) = tls_error {
                    message.push_str(" | TLS error: ");
                    message.push_str(tls);
                }
                message
            }
            TransportFault::ConnectionRefused { code } => {
                format!("connection refused, error: {code}")
            }
            TransportFault::Unknown { kind } => format!("unknown error type: {kind}"),
        }
    }
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// What a session reports back to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// About to attempt a connection
    BeforeConnect,
    Connected,
    Disconnected,
    Subscribed { message_id: MessageId },
    Unsubscribed { message_id: MessageId },
    Published { message_id: MessageId },
    Data(Fragment),
    Error(TransportFault),
}

impl TransportEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEventKind::BeforeConnect => "before_connect",
            TransportEventKind::Connected => "connected",
            TransportEventKind::Disconnected => "disconnected",
            TransportEventKind::Subscribed { .. } => "subscribed",
            TransportEventKind::Unsubscribed { .. } => "unsubscribed",
            TransportEventKind::Published { .. } => "published",
            TransportEventKind::Data(_) => "data",
            TransportEventKind::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub session: SessionId,
    pub kind: TransportEventKind,
}

/// Session-tagged sender handed to a transport at configure time
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Deliver an event; returns false once the controller is gone
    pub fn emit(&self, kind: TransportEventKind) -> bool {
        self.tx
            .send(TransportEvent {
                session: self.session,
                kind,
            })
            .is_ok()
    }
}

/// Transport lifecycle and command errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to configure session: {0}")]
    Configure(String),
    #[error("Failed to start session: {0}")]
    Start(String),
    #[error("Failed to stop session: {0}")]
    Stop(String),
    #[error("Failed to suspend session: {0}")]
    Suspend(String),
    #[error("Failed to resume session: {0}")]
    Resume(String),
    #[error("Command rejected: {0}")]
    Command(String),
    #[error("Session is not running")]
    NotRunning,
}

/// Factory for broker sessions
///
/// This trait lets the controller run against the real MQTT client or a mock.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Session: TransportSession;

    /// Build a session for `profile` connecting to `host`; nothing is sent yet
    async fn configure(
        &mut self,
        profile: &BrokerProfile,
        host: &str,
        sink: EventSink,
    ) -> Result<Self::Session, TransportError>;
}

/// One configured broker session
#[async_trait::async_trait]
pub trait TransportSession: Send {
    /// Begin connecting; progress is reported through the sink
    async fn start(&mut self) -> Result<(), TransportError>;

    /// Disconnect and release the session's resources
    async fn stop(&mut self) -> Result<(), TransportError>;

    /// Disconnect but keep the configuration for a later resume
    async fn suspend(&mut self) -> Result<(), TransportError>;

    async fn resume(&mut self) -> Result<(), TransportError>;

    /// Send a message; `forced` bypasses the transport's own outgoing queue
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
        forced: bool,
    ) -> Result<MessageId, TransportError>;

    async fn subscribe(&mut self, topic: &str, qos: QosLevel) -> Result<MessageId, TransportError>;

    async fn unsubscribe(&mut self, topic: &str) -> Result<MessageId, TransportError>;
}
