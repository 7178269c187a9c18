//! rumqttc-backed transport sessions
//!
//! Each session owns one `AsyncClient` and a spawned task polling its event
//! loop. The task translates every polled event into transport callbacks
//! through the session's [`EventSink`], so nothing in here decides policy:
//! reconnect pacing comes from the profile and failover lives in the
//! controller.

use super::event_map::{map_error, map_event};
use super::options::{configure_mqtt_options, to_qos};
use crate::broker::BrokerProfile;
use crate::mqtt_span;
use crate::protocol::QosLevel;
use crate::transport::{
    EventSink, MessageId, Transport, TransportError, TransportEventKind, TransportSession,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, ClientError, Event, EventLoop, MqttOptions};
use rumqttc::Outgoing;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Grace period for the event loop task to flush DISCONNECT and exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const DEFAULT_REQUEST_CAPACITY: usize = 10;

/// Builds [`RumqttSession`]s
#[derive(Debug, Clone)]
pub struct RumqttTransport {
    request_capacity: usize,
}

impl RumqttTransport {
    /// `request_capacity` bounds rumqttc's outgoing request channel
    pub fn new(request_capacity: usize) -> Self {
        Self {
            request_capacity: request_capacity.max(1),
        }
    }
}

impl Default for RumqttTransport {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_CAPACITY)
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    type Session = RumqttSession;

    async fn configure(
        &mut self,
        profile: &BrokerProfile,
        host: &str,
        sink: EventSink,
    ) -> Result<Self::Session, TransportError> {
        if host.is_empty() {
            return Err(TransportError::Configure("empty broker host".to_string()));
        }
        let options = configure_mqtt_options(profile, host);
        debug!(
            slot = %profile.slot,
            host,
            port = profile.port,
            tls = profile.is_tls(),
            "Configured MQTT session"
        );

        Ok(RumqttSession {
            options,
            sink,
            settings: LoopSettings {
                reconnect_delay: profile.reconnect_timeout,
                auto_reconnect: profile.auto_reconnect,
                chunk_size: profile.read_buffer_size,
            },
            request_capacity: self.request_capacity,
            client: None,
            event_loop_handle: None,
            control_tx: None,
            stopped: false,
            next_message_id: 0,
        })
    }
}

/// What the session asks of its event loop task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Run,
    /// A DISCONNECT is queued; exit once it is on the wire
    Drain,
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    reconnect_delay: Duration,
    auto_reconnect: bool,
    chunk_size: usize,
}

/// One broker session driven by rumqttc
pub struct RumqttSession {
    options: MqttOptions,
    sink: EventSink,
    settings: LoopSettings,
    request_capacity: usize,
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    control_tx: Option<watch::Sender<LoopControl>>,
    stopped: bool,
    next_message_id: MessageId,
}

impl RumqttSession {
    pub fn is_running(&self) -> bool {
        self.client.is_some()
    }

    fn launch(&mut self) {
        if self.is_running() {
            debug!(session = self.sink.session(), "Session already running");
            return;
        }

        let (client, event_loop) = AsyncClient::new(self.options.clone(), self.request_capacity);
        let (control_tx, control_rx) = watch::channel(LoopControl::Run);

        let handle = tokio::spawn(run_event_loop(
            event_loop,
            self.sink.clone(),
            self.settings,
            control_rx,
        ));

        self.client = Some(client);
        self.control_tx = Some(control_tx);
        self.event_loop_handle = Some(handle);
    }

    /// Disconnect and wait for the event loop task to finish
    ///
    /// The task keeps polling until DISCONNECT has been written, so the
    /// broker sees a clean close and discards the last will.
    async fn halt(&mut self) {
        let disconnect_queued = match self.client.take() {
            Some(client) => match client.try_disconnect() {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "Disconnect request not queued");
                    false
                }
            },
            None => false,
        };

        // Held until the task is done; dropping it reads as Stop
        let control_tx = self.control_tx.take();
        if let Some(control_tx) = &control_tx {
            let control = if disconnect_queued {
                LoopControl::Drain
            } else {
                LoopControl::Stop
            };
            let _ = control_tx.send(control);
        }

        if let Some(handle) = self.event_loop_handle.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) => warn!(error = %e, "Event loop task ended abnormally"),
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    abort.abort();
                }
            }
        }
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::NotRunning)
    }

    /// rumqttc hides packet ids, so ids are counted locally; QoS 0 gets 0
    fn allocate_message_id(&mut self, qos: QosLevel) -> MessageId {
        if qos == QosLevel::AtMostOnce {
            return 0;
        }
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        self.next_message_id
    }
}

impl Drop for RumqttSession {
    fn drop(&mut self) {
        if let Some(control_tx) = &self.control_tx {
            let _ = control_tx.send(LoopControl::Stop);
        }
        if let Some(handle) = &self.event_loop_handle {
            handle.abort();
        }
    }
}

fn command_error(error: ClientError) -> TransportError {
    TransportError::Command(error.to_string())
}

#[async_trait]
impl TransportSession for RumqttSession {
    async fn start(&mut self) -> Result<(), TransportError> {
        if self.stopped {
            return Err(TransportError::Start("session was stopped".to_string()));
        }
        self.launch();
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        self.halt().await;
        self.stopped = true;
        Ok(())
    }

    async fn suspend(&mut self) -> Result<(), TransportError> {
        if !self.is_running() {
            return Err(TransportError::Suspend("session is not running".to_string()));
        }
        self.halt().await;
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), TransportError> {
        if self.stopped {
            return Err(TransportError::Resume("session was stopped".to_string()));
        }
        self.launch();
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
        forced: bool,
    ) -> Result<MessageId, TransportError> {
        let client = self.client()?;
        if forced {
            client
                .publish(topic, to_qos(qos), retain, payload)
                .await
                .map_err(command_error)?;
        } else {
            client
                .try_publish(topic, to_qos(qos), retain, payload)
                .map_err(command_error)?;
        }
        Ok(self.allocate_message_id(qos))
    }

    async fn subscribe(&mut self, topic: &str, qos: QosLevel) -> Result<MessageId, TransportError> {
        self.client()?
            .subscribe(topic, to_qos(qos))
            .await
            .map_err(command_error)?;
        Ok(self.allocate_message_id(QosLevel::AtLeastOnce))
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<MessageId, TransportError> {
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(command_error)?;
        Ok(self.allocate_message_id(QosLevel::AtLeastOnce))
    }
}

/// Poll until stopped, until DISCONNECT is flushed while draining, or
/// until the first error when auto-reconnect is off
async fn run_event_loop(
    mut event_loop: EventLoop,
    sink: EventSink,
    settings: LoopSettings,
    mut control_rx: watch::Receiver<LoopControl>,
) {
    let span = mqtt_span!(session = sink.session());
    async move {
        if !sink.emit(TransportEventKind::BeforeConnect) {
            return;
        }

        loop {
            tokio::select! {
                // Check for shutdown signal first (higher priority)
                biased;
                changed = control_rx.changed() => {
                    if changed.is_err() || *control_rx.borrow() == LoopControl::Stop {
                        info!("Shutdown signal received, stopping event loop");
                        break;
                    }
                }
                polled = event_loop.poll() => match polled {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("Disconnect sent, stopping event loop");
                        break;
                    }
                    Ok(event) => {
                        for kind in map_event(&event, settings.chunk_size) {
                            if !sink.emit(kind) {
                                return;
                            }
                        }
                    }
                    Err(e) if *control_rx.borrow() != LoopControl::Run => {
                        debug!(error = %e, "Connection ended while shutting down");
                        break;
                    }
                    Err(e) => {
                        let fault = map_error(&e);
                        warn!(error = %fault, "MQTT event loop error");
                        if !sink.emit(TransportEventKind::Error(fault))
                            || !sink.emit(TransportEventKind::Disconnected)
                        {
                            return;
                        }

                        if !settings.auto_reconnect {
                            info!("Auto-reconnect disabled, event loop ends");
                            break;
                        }
                        if !interruptible_sleep(control_rx.clone(), settings.reconnect_delay).await {
                            break;
                        }
                        if !sink.emit(TransportEventKind::BeforeConnect) {
                            return;
                        }
                    }
                }
            }
        }
    }
    .instrument(span)
    .await
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
///
/// There is no connection to flush during the delay, so draining stops too.
async fn interruptible_sleep(mut control_rx: watch::Receiver<LoopControl>, delay: Duration) -> bool {
    tokio::select! {
        changed = control_rx.changed() => {
            if changed.is_err() || *control_rx.borrow() != LoopControl::Run {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(delay) => {
            true
        }
    }
}
