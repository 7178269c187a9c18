//! Actor task owning the connection controller
//!
//! The controller is not shared: one tokio task owns it and processes
//! signals, commands, transport callbacks and queue flushes one at a time.
//! [`ControllerHandle`] is the cloneable front end used by everything else.

use super::controller::{ConnectionController, SessionInfo, Signal};
use crate::bus::EventBus;
use crate::error::{LinkError, LinkResult};
use crate::protocol::QosLevel;
use crate::transport::{Transport, TransportEvent};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const COMMAND_CAPACITY: usize = 64;

enum Command {
    Signal(Signal),
    Publish {
        topic: String,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
        forced: bool,
        reply: oneshot::Sender<bool>,
    },
    Subscribe {
        topic: String,
        qos: QosLevel,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe {
        topic: String,
        reply: oneshot::Sender<bool>,
    },
    SessionInfo {
        reply: oneshot::Sender<Option<SessionInfo>>,
    },
    Shutdown {
        reply: oneshot::Sender<LinkResult<()>>,
    },
}

/// Cloneable handle to a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Signal(signal) => write!(f, "Signal({signal:?})"),
            Command::Publish { topic, .. } => write!(f, "Publish({topic})"),
            Command::Subscribe { topic, .. } => write!(f, "Subscribe({topic})"),
            Command::Unsubscribe { topic, .. } => write!(f, "Unsubscribe({topic})"),
            Command::SessionInfo { .. } => f.write_str("SessionInfo"),
            Command::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl ControllerHandle {
    /// Queue a signal; ordering with other commands is preserved
    pub async fn signal(&self, signal: Signal) -> LinkResult<()> {
        self.commands
            .send(Command::Signal(signal))
            .await
            .map_err(|_| LinkError::ControllerClosed)
    }

    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QosLevel,
        retain: bool,
        forced: bool,
    ) -> LinkResult<bool> {
        let topic = topic.into();
        let payload = payload.into();
        self.request(|reply| Command::Publish {
            topic,
            payload,
            qos,
            retain,
            forced,
            reply,
        })
        .await
    }

    pub async fn subscribe(&self, topic: impl Into<String>, qos: QosLevel) -> LinkResult<bool> {
        let topic = topic.into();
        self.request(|reply| Command::Subscribe { topic, qos, reply })
            .await
    }

    pub async fn unsubscribe(&self, topic: impl Into<String>) -> LinkResult<bool> {
        let topic = topic.into();
        self.request(|reply| Command::Unsubscribe { topic, reply })
            .await
    }

    pub async fn session_info(&self) -> LinkResult<Option<SessionInfo>> {
        self.request(|reply| Command::SessionInfo { reply }).await
    }

    /// Stop the session and end the controller task
    pub async fn shutdown(&self) -> LinkResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await?
    }

    async fn request<R>(&self, build: impl FnOnce(oneshot::Sender<R>) -> Command) -> LinkResult<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| LinkError::ControllerClosed)?;
        response.await.map_err(|_| LinkError::ControllerClosed)
    }
}

/// Move the controller onto its own task
pub fn spawn<T, B>(mut controller: ConnectionController<T, B>) -> (ControllerHandle, JoinHandle<()>)
where
    T: Transport + 'static,
    T::Session: 'static,
    B: EventBus + 'static,
{
    let (commands_tx, mut commands_rx) = mpsc::channel(COMMAND_CAPACITY);
    let flush_interval = controller.outbox_flush_interval();

    let task = tokio::spawn(async move {
        let mut events = controller.take_transport_events();
        let mut flush = tokio::time::interval(flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Connection controller started");

        loop {
            tokio::select! {
                Some(event) = next_event(&mut events) => {
                    controller.handle_transport_event(event).await;
                }
                command = commands_rx.recv() => {
                    let Some(command) = command else {
                        info!("All controller handles dropped, shutting down");
                        if let Err(e) = controller.shutdown().await {
                            warn!(error = %e, "Shutdown after handle drop failed");
                        }
                        break;
                    };
                    if !dispatch(&mut controller, command).await {
                        break;
                    }
                }
                _ = flush.tick() => {
                    controller.flush_outbox().await;
                }
            }
        }

        info!("Connection controller stopped");
    });

    (
        ControllerHandle {
            commands: commands_tx,
        },
        task,
    )
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Returns false once the loop should end
async fn dispatch<T, B>(controller: &mut ConnectionController<T, B>, command: Command) -> bool
where
    T: Transport,
    B: EventBus,
{
    debug!(?command, "Controller command");
    match command {
        Command::Signal(signal) => {
            if let Err(e) = controller.handle_signal(signal).await {
                error!(error = %e, fatal = e.is_fatal(), "Signal handling failed");
            }
        }
        Command::Publish {
            topic,
            payload,
            qos,
            retain,
            forced,
            reply,
        } => {
            let accepted = controller.publish(&topic, payload, qos, retain, forced).await;
            let _ = reply.send(accepted);
        }
        Command::Subscribe { topic, qos, reply } => {
            let _ = reply.send(controller.subscribe(&topic, qos).await);
        }
        Command::Unsubscribe { topic, reply } => {
            let _ = reply.send(controller.unsubscribe(&topic).await);
        }
        Command::SessionInfo { reply } => {
            let _ = reply.send(controller.session_info().cloned());
        }
        Command::Shutdown { reply } => {
            let _ = reply.send(controller.shutdown().await);
            return false;
        }
    }
    true
}
