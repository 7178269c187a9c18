//! Connection controller
//!
//! Top-level facade owning the failover state machine, the availability
//! tracker, the reassembler, the error latch and the outgoing queue. Signals
//! and transport callbacks are handled one at a time; every decision that
//! touches the transport goes through [`FailoverController::reconcile`].

use super::latch::ErrorLatch;
use super::outbox::{EnqueueOutcome, OutgoingMessage, Outbox};
use super::reassembly::{FragmentOutcome, Reassembler};
use crate::broker::{
    AvailabilityTracker, AvailabilityUpdate, Endpoint, FailoverController, FailoverState,
    Selection, Slot, SlotProfiles, Transition,
};
use crate::bus::EventBus;
use crate::config::LinkConfig;
use crate::error::{sanitize_error_message, LinkError, LinkResult};
use crate::lifecycle_span;
use crate::protocol::{LifecycleEvent, QosLevel, TopicBuilder};
use crate::transport::{
    Fragment, SessionId, Transport, TransportError, TransportEvent, TransportEventKind,
    TransportFault, TransportSession,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn, Instrument};

/// Payloads longer than this are logged by size only
pub const LOG_PAYLOAD_LIMIT: usize = 2048;

/// Inputs from link monitors, reachability probes and the minute clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Network link is up; carries the LAN gateway when known
    LinkUp { gateway: Option<IpAddr> },
    LinkDown,
    InternetReachable(bool),
    BrokerProbe { slot: Slot, available: bool },
    MinuteTick,
}

/// Snapshot of the current session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub slot: Slot,
    pub session_id: SessionId,
    pub host: String,
    pub port: u16,
    pub connected: bool,
    /// Connection attempts since the last success
    pub attempts: u32,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl SessionInfo {
    fn new(slot: Slot, session_id: SessionId, endpoint: &Endpoint, started_at: DateTime<Utc>) -> Self {
        Self {
            slot,
            session_id,
            host: endpoint.host.clone(),
            port: endpoint.port,
            connected: false,
            attempts: 0,
            last_error: None,
            started_at,
        }
    }
}

/// Render a payload for logs without dumping large bodies
pub fn describe_payload(payload: &[u8]) -> String {
    if payload.len() > LOG_PAYLOAD_LIMIT {
        format!("[ {} bytes ]", payload.len())
    } else {
        String::from_utf8_lossy(payload).into_owned()
    }
}

pub struct ConnectionController<T: Transport, B: EventBus> {
    config: LinkConfig,
    failover: FailoverController<T>,
    tracker: AvailabilityTracker,
    reassembler: Reassembler,
    latch: ErrorLatch,
    outbox: Outbox,
    session: Option<SessionInfo>,
    bus: B,
    link_up: bool,
    gateway: Option<IpAddr>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl<T: Transport, B: EventBus> ConnectionController<T, B> {
    pub fn new(config: &LinkConfig, transport: T, bus: B) -> LinkResult<Self> {
        config.validate()?;
        let profiles = SlotProfiles::from_config(config)?;
        let tracker = AvailabilityTracker::from_profiles(&profiles);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let failover = FailoverController::new(
            transport,
            profiles,
            Duration::from_millis(config.session.switch_delay_ms),
            config.session.back_to_primary_minutes,
            events_tx,
        );

        Ok(Self {
            config: config.clone(),
            failover,
            tracker,
            reassembler: Reassembler::new(config.session.max_message_size),
            latch: ErrorLatch::new(),
            outbox: Outbox::new(config.session.outbox_capacity),
            session: None,
            bus,
            link_up: false,
            gateway: config.signals.gateway,
            events_rx: Some(events_rx),
        })
    }

    /// Receiver for transport callbacks; can be taken once
    pub fn take_transport_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    pub fn session_info(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.failover.session_id()
    }

    pub fn failover_state(&self) -> FailoverState {
        self.failover.state()
    }

    pub fn tracker(&self) -> &AvailabilityTracker {
        &self.tracker
    }

    pub fn failover(&self) -> &FailoverController<T> {
        &self.failover
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up
    }

    /// Link up and the current session confirmed by the broker
    pub fn is_connected(&self) -> bool {
        self.link_up && self.session.as_ref().is_some_and(|info| info.connected)
    }

    pub fn error_latched(&self) -> bool {
        self.latch.is_set()
    }

    pub fn queued_messages(&self) -> usize {
        self.outbox.len()
    }

    pub fn outbox_flush_interval(&self) -> Duration {
        Duration::from_millis(self.config.session.outbox_flush_ms.max(1))
    }

    /// Selection after applying the link state
    pub fn effective_selection(&self) -> Selection {
        if self.link_up {
            self.tracker.current_selection()
        } else {
            Selection::None
        }
    }

    pub async fn handle_signal(&mut self, signal: Signal) -> LinkResult<()> {
        debug!(?signal, "Signal received");
        match signal {
            Signal::LinkUp { gateway } => {
                self.link_up = true;
                if gateway.is_some() {
                    self.gateway = gateway;
                }
                // Reachability is unverified until the next probe
                self.tracker.set_internet_reachable(false);
                self.reconcile().await
            }
            Signal::LinkDown => {
                if !self.link_up {
                    return Ok(());
                }
                self.link_up = false;
                self.reconcile().await
            }
            Signal::InternetReachable(reachable) => {
                let update = self.tracker.set_internet_reachable(reachable);
                self.reconcile_if_changed(update).await
            }
            Signal::BrokerProbe { slot, available } => {
                let update = self.tracker.set_available(slot, available);
                self.reconcile_if_changed(update).await
            }
            Signal::MinuteTick => {
                if !self.failover.tick() {
                    return Ok(());
                }
                info!("Re-probing primary broker");
                let update = self.tracker.reprobe_primary();
                self.reconcile_if_changed(update).await
            }
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.failover.session_id() != Some(event.session) {
            debug!(
                session = event.session,
                kind = event.kind.name(),
                "Dropping callback from a stopped session"
            );
            return;
        }

        match event.kind {
            TransportEventKind::BeforeConnect => {
                if let Some(info) = self.session.as_mut() {
                    info.attempts += 1;
                    debug!(slot = %info.slot, attempt = info.attempts, "Connecting to broker");
                }
                self.bus.activity();
            }
            TransportEventKind::Connected => self.on_connected().await,
            TransportEventKind::Disconnected => self.on_disconnected().await,
            TransportEventKind::Subscribed { message_id }
            | TransportEventKind::Unsubscribed { message_id }
            | TransportEventKind::Published { message_id } => {
                trace!(message_id, "Broker acknowledged request");
                self.clear_error();
                self.bus.activity();
            }
            TransportEventKind::Data(fragment) => self.on_fragment(fragment),
            TransportEventKind::Error(fault) => self.on_transport_error(fault),
        }
    }

    /// Publish a message; `forced` bypasses the outgoing queue
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
        forced: bool,
    ) -> bool {
        if !self.is_connected() {
            debug!(topic, "Publish rejected, not connected");
            return false;
        }

        if forced {
            return self.send_now(topic, payload, qos, retain).await;
        }

        let size = payload.len();
        let outcome = self.outbox.enqueue(OutgoingMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        match outcome {
            EnqueueOutcome::Full => {
                warn!(topic, queued = self.outbox.len(), "Outgoing queue full, message dropped");
                false
            }
            EnqueueOutcome::Queued | EnqueueOutcome::Coalesced => {
                trace!(topic, size, ?outcome, "Message queued");
                true
            }
        }
    }

    pub async fn subscribe(&mut self, topic: &str, qos: QosLevel) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Some(session) = self.failover.session_mut() else {
            return false;
        };
        let result = session.subscribe(topic, qos).await;
        match result {
            Ok(message_id) => {
                info!(topic, %qos, message_id, "Subscribed");
                true
            }
            Err(e) => {
                self.command_failed("subscribe", topic, &e);
                false
            }
        }
    }

    pub async fn unsubscribe(&mut self, topic: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Some(session) = self.failover.session_mut() else {
            return false;
        };
        let result = session.unsubscribe(topic).await;
        match result {
            Ok(message_id) => {
                info!(topic, message_id, "Unsubscribed");
                true
            }
            Err(e) => {
                self.command_failed("unsubscribe", topic, &e);
                false
            }
        }
    }

    /// Hand queued messages to the transport; returns how many were sent
    pub async fn flush_outbox(&mut self) -> usize {
        if self.outbox.is_empty() || !self.is_connected() {
            return 0;
        }

        let mut sent = 0;
        while let Some(message) = self.outbox.pop() {
            let Some(session) = self.failover.session_mut() else {
                self.outbox.requeue_front(message);
                break;
            };
            let result = session
                .publish(
                    &message.topic,
                    message.payload.clone(),
                    message.qos,
                    message.retain,
                    false,
                )
                .await;
            match result {
                Ok(message_id) => {
                    trace!(topic = %message.topic, message_id, "Queued message sent");
                    sent += 1;
                }
                Err(e) => {
                    self.command_failed("publish", &message.topic, &e);
                    self.outbox.requeue_front(message);
                    break;
                }
            }
        }
        sent
    }

    /// Stop the session and drop queued state
    pub async fn shutdown(&mut self) -> LinkResult<()> {
        info!("Shutting down connection controller");
        self.outbox.clear();
        self.reassembler.reset();
        let result = self.failover.shutdown().await;
        if self.failover.state() == FailoverState::Stopped {
            self.session = None;
            self.tracker.set_connected(None);
        }
        result
    }

    async fn reconcile_if_changed(&mut self, update: AvailabilityUpdate) -> LinkResult<()> {
        if update.input_changed {
            self.reconcile().await
        } else {
            Ok(())
        }
    }

    async fn reconcile(&mut self) -> LinkResult<()> {
        let selection = self.effective_selection();
        let span = lifecycle_span!(operation = "reconcile", ?selection, state = %self.failover.state());
        let result = self
            .failover
            .reconcile(selection, self.gateway)
            .instrument(span)
            .await;

        match result {
            Ok(transition) => {
                self.apply_transition(transition);
                Ok(())
            }
            Err(e) => {
                if self.failover.state() == FailoverState::Stopped {
                    self.session = None;
                    self.tracker.set_connected(None);
                }
                error!(error = %e, "Broker lifecycle transition failed");
                self.bus.post(LifecycleEvent::SystemFault {
                    message: e.sanitized_message(),
                });
                Err(e)
            }
        }
    }

    fn apply_transition(&mut self, transition: Transition) {
        match transition {
            Transition::None => {}
            Transition::Start(slot) | Transition::Switch { to: slot, .. } => {
                self.reassembler.reset();
                self.tracker.set_connected(None);
                let now = Utc::now();
                self.tracker.mark_activated(slot, now);
                self.session = self
                    .failover
                    .session_id()
                    .zip(self.failover.endpoint())
                    .map(|(id, endpoint)| SessionInfo::new(slot, id, endpoint, now));
                self.bus.post(LifecycleEvent::selected(slot));
            }
            Transition::Suspend(_) => {
                self.reassembler.reset();
                self.tracker.set_connected(None);
                if let Some(info) = self.session.as_mut() {
                    info.attempts = 0;
                    if std::mem::replace(&mut info.connected, false) {
                        self.bus.post(LifecycleEvent::ConnectionLost {
                            slot: info.slot,
                            host: info.host.clone(),
                            port: info.port,
                        });
                    }
                }
            }
            Transition::Resume(_) => {
                if let Some(info) = self.session.as_mut() {
                    info.attempts = 0;
                }
            }
        }
    }

    async fn on_connected(&mut self) {
        let Some(info) = self.session.as_mut() else {
            return;
        };
        info.connected = true;
        info.attempts = 0;
        info.last_error = None;
        let (slot, host, port) = (info.slot, info.host.clone(), info.port);

        info!(slot = %slot, host = %host, port, "Connected to broker");
        let update = self.tracker.set_connected(Some(slot));
        self.bus.post(LifecycleEvent::Connected { slot, host, port });
        self.clear_error();
        self.bus.activity();

        if self.config.status.online {
            let topic = TopicBuilder::device_status_topic(&self.config, slot);
            let payload = Bytes::from(self.config.status.online_payload.clone());
            let qos = QosLevel::from_level(self.config.status.qos);
            let retained = self.config.status.retained;
            self.send_now(&topic, payload, qos, retained).await;
        }

        let subscriptions = self.config.session.subscriptions.clone();
        for topic in &subscriptions {
            self.subscribe(topic, QosLevel::AtLeastOnce).await;
        }

        self.flush_outbox().await;

        if update.selection_changed() {
            if let Err(e) = self.reconcile().await {
                warn!(error = %e, "Reconcile after connect failed");
            }
        }
    }

    async fn on_disconnected(&mut self) {
        self.bus.activity();
        let Some(info) = self.session.as_mut() else {
            return;
        };
        let (slot, host, port) = (info.slot, info.host.clone(), info.port);

        if std::mem::replace(&mut info.connected, false) {
            warn!(slot = %slot, host = %host, port, "Connection to broker lost");
            self.bus.post(LifecycleEvent::ConnectionLost {
                slot,
                host: host.clone(),
                port,
            });
            self.raise_error(format!("connection to {host}:{port} lost"));
            let update = self.tracker.set_connected(None);
            if update.selection_changed() {
                if let Err(e) = self.reconcile().await {
                    warn!(error = %e, "Reconcile after connection loss failed");
                }
            }
            return;
        }

        let attempts = info.attempts;
        if attempts != self.config.session.connect_attempts {
            debug!(slot = %slot, attempts, "Connection attempt failed");
            return;
        }

        let error = LinkError::ConnectionExhausted { slot, attempts };
        warn!(host = %host, port, error = %error, "Broker unreachable");
        self.bus.post(LifecycleEvent::ConnectionFailed {
            slot,
            host,
            port,
            attempts,
        });

        // Without a reserved broker there is nothing to fail over to
        if self.tracker.is_configured(Slot::Reserved) {
            let update = self.tracker.set_available(slot, false);
            if update.input_changed {
                if let Err(e) = self.reconcile().await {
                    warn!(slot = %slot, error = %e, "Failover after exhausted attempts failed");
                }
            }
        }
    }

    fn on_fragment(&mut self, fragment: Fragment) {
        self.bus.activity();
        let outcome = self.reassembler.on_fragment(
            fragment.offset,
            &fragment.data,
            fragment.total_len,
            &fragment.topic,
        );
        match outcome {
            FragmentOutcome::Complete(message) => {
                debug!(
                    topic = %message.topic,
                    payload = %describe_payload(&message.payload),
                    "Message received"
                );
                self.bus.post(LifecycleEvent::IncomingMessage(message));
            }
            FragmentOutcome::AllocationFailed { total_len } => {
                let error = LinkError::ReassemblyAllocation { total_len };
                warn!(error = %error, "Inbound message dropped");
            }
            FragmentOutcome::Pending | FragmentOutcome::Dropped => {}
        }
    }

    fn on_transport_error(&mut self, fault: TransportFault) {
        self.bus.activity();
        let message = sanitize_error_message(&fault.describe());
        let error = LinkError::transport_runtime(message.clone());
        warn!(error = %error, "Transport reported an error");

        if let Some(info) = self.session.as_mut() {
            info.last_error = Some(message.clone());
        }
        self.raise_error(message);
    }

    async fn send_now(&mut self, topic: &str, payload: Bytes, qos: QosLevel, retain: bool) -> bool {
        let described = describe_payload(&payload);
        let Some(session) = self.failover.session_mut() else {
            return false;
        };
        let result = session.publish(topic, payload, qos, retain, true).await;
        match result {
            Ok(message_id) => {
                debug!(topic, %qos, retain, message_id, payload = %described, "Published");
                true
            }
            Err(e) => {
                self.command_failed("publish", topic, &e);
                false
            }
        }
    }

    fn command_failed(&mut self, operation: &str, topic: &str, error: &TransportError) {
        error!(operation, topic, error = %error, "Transport command failed");
        self.raise_error(sanitize_error_message(&format!(
            "{operation} on {topic} failed: {error}"
        )));
    }

    fn raise_error(&mut self, message: String) {
        if self.latch.raise() {
            self.bus.post(LifecycleEvent::Error { message });
        }
    }

    fn clear_error(&mut self) {
        if self.latch.clear() {
            self.bus.post(LifecycleEvent::ErrorCleared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, RecordingBus, TransportCall};

    async fn connected_controller() -> (
        ConnectionController<MockTransport, RecordingBus>,
        MockTransport,
        RecordingBus,
    ) {
        let mock = MockTransport::new();
        let bus = RecordingBus::new();
        let mut controller =
            ConnectionController::new(&LinkConfig::test_config(), mock.clone(), bus.clone())
                .unwrap();
        controller
            .handle_signal(Signal::LinkUp { gateway: None })
            .await
            .unwrap();
        controller
            .handle_signal(Signal::InternetReachable(true))
            .await
            .unwrap();
        let session = controller.session_id().unwrap();
        controller
            .handle_transport_event(TransportEvent {
                session,
                kind: TransportEventKind::Connected,
            })
            .await;
        (controller, mock, bus)
    }

    #[test]
    fn test_describe_payload() {
        assert_eq!(describe_payload(b"21.5"), "21.5");
        let large = vec![b'x'; LOG_PAYLOAD_LIMIT + 1];
        assert_eq!(describe_payload(&large), "[ 2049 bytes ]");
        let exact = vec![b'x'; LOG_PAYLOAD_LIMIT];
        assert_eq!(describe_payload(&exact).len(), LOG_PAYLOAD_LIMIT);
    }

    #[tokio::test]
    async fn test_connected_publishes_online_status() {
        let (controller, mock, bus) = connected_controller().await;

        assert!(controller.is_connected());
        assert_eq!(bus.count("connected"), 1);
        assert_eq!(
            mock.published().await,
            vec![TransportCall::Publish {
                topic: "lab/test-device/status".to_string(),
                payload: Bytes::from_static(b"online"),
                qos: QosLevel::AtLeastOnce,
                retain: true,
                forced: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_queued_publish_is_flushed() {
        let (mut controller, mock, _bus) = connected_controller().await;
        mock.clear_calls().await;

        assert!(
            controller
                .publish("lab/t", Bytes::from_static(b"1"), QosLevel::AtMostOnce, false, false)
                .await
        );
        assert!(
            controller
                .publish("lab/t", Bytes::from_static(b"2"), QosLevel::AtMostOnce, false, false)
                .await
        );
        assert!(mock.published().await.is_empty());
        assert_eq!(controller.queued_messages(), 1);

        assert_eq!(controller.flush_outbox().await, 1);
        let published = mock.published().await;
        assert_eq!(published.len(), 1);
        assert!(matches!(
            &published[0],
            TransportCall::Publish { payload, forced: false, .. } if &payload[..] == b"2"
        ));
    }

    #[tokio::test]
    async fn test_commands_rejected_when_not_connected() {
        let mock = MockTransport::new();
        let mut controller =
            ConnectionController::new(&LinkConfig::test_config(), mock.clone(), RecordingBus::new())
                .unwrap();

        assert!(
            !controller
                .publish("t", Bytes::new(), QosLevel::AtMostOnce, false, true)
                .await
        );
        assert!(!controller.subscribe("t", QosLevel::AtMostOnce).await);
        assert!(!controller.unsubscribe("t").await);
        assert!(mock.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_session_callbacks_dropped() {
        let (mut controller, _mock, bus) = connected_controller().await;
        let stale = controller.session_id().unwrap() + 100;
        bus.clear();

        controller
            .handle_transport_event(TransportEvent {
                session: stale,
                kind: TransportEventKind::Disconnected,
            })
            .await;

        assert!(controller.is_connected());
        assert!(bus.events().is_empty());
    }
}
