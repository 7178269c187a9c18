//! Failover lifecycle state machine
//!
//! Planning is pure: [`Transition::plan`] maps the current state and the
//! selected broker to exactly one transition. [`FailoverController`] then
//! performs it against the transport. A switch is always a full stop, a
//! quiescence delay and a fresh start with the other slot's profile.

use super::availability::Selection;
use super::profile::{Slot, SlotProfiles};
use crate::error::{LinkError, LinkResult};
use crate::transport::{
    EventSink, SessionId, Transport, TransportError, TransportEvent, TransportSession,
};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Lifecycle state including the slot the session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverState {
    Stopped,
    Started(Slot),
    Suspended(Slot),
}

impl FailoverState {
    pub fn slot(self) -> Option<Slot> {
        match self {
            FailoverState::Stopped => None,
            FailoverState::Started(slot) | FailoverState::Suspended(slot) => Some(slot),
        }
    }
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverState::Stopped => f.write_str("stopped"),
            FailoverState::Started(slot) => write!(f, "started({slot})"),
            FailoverState::Suspended(slot) => write!(f, "suspended({slot})"),
        }
    }
}

/// One step of the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Start(Slot),
    Switch { from: Slot, to: Slot },
    Suspend(Slot),
    Resume(Slot),
}

impl Transition {
    /// Decide the transition for `selection` given the current state
    pub fn plan(state: FailoverState, selection: Selection) -> Transition {
        let target = selection.slot();
        match (state, target) {
            (FailoverState::Stopped, Some(slot)) => Transition::Start(slot),
            (FailoverState::Stopped, None) => Transition::None,

            (FailoverState::Started(current), Some(slot)) if current == slot => Transition::None,
            (FailoverState::Started(current), Some(slot)) => Transition::Switch {
                from: current,
                to: slot,
            },
            (FailoverState::Started(current), None) => Transition::Suspend(current),

            (FailoverState::Suspended(current), Some(slot)) if current == slot => {
                Transition::Resume(current)
            }
            (FailoverState::Suspended(current), Some(slot)) => Transition::Switch {
                from: current,
                to: slot,
            },
            (FailoverState::Suspended(_), None) => Transition::None,
        }
    }

    /// Slot that becomes active through this transition, if any
    pub fn activates(self) -> Option<Slot> {
        match self {
            Transition::Start(slot) | Transition::Switch { to: slot, .. } => Some(slot),
            _ => None,
        }
    }
}

/// Minute countdown that re-probes the primary broker while on reserved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackToPrimaryTimer {
    threshold: u32,
    elapsed: Option<u32>,
}

impl BackToPrimaryTimer {
    /// A threshold of 0 disables the countdown
    pub fn new(threshold_minutes: u32) -> Self {
        Self {
            threshold: threshold_minutes,
            elapsed: None,
        }
    }

    /// (Re)start counting from zero
    pub fn start(&mut self) {
        if self.threshold > 0 {
            self.elapsed = Some(0);
        }
    }

    pub fn cancel(&mut self) {
        self.elapsed = None;
    }

    pub fn is_running(&self) -> bool {
        self.elapsed.is_some()
    }

    pub fn elapsed(&self) -> Option<u32> {
        self.elapsed
    }

    /// Advance one minute; returns true when the threshold is reached
    ///
    /// Firing resets the count and leaves the timer running.
    pub fn tick(&mut self) -> bool {
        let Some(elapsed) = self.elapsed.as_mut() else {
            return false;
        };
        *elapsed += 1;
        if *elapsed >= self.threshold {
            *elapsed = 0;
            true
        } else {
            false
        }
    }
}

/// Host and port of the active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

struct ActiveSession<S> {
    id: SessionId,
    session: S,
    endpoint: Endpoint,
}

/// Drives the transport through start/stop/suspend/resume
pub struct FailoverController<T: Transport> {
    transport: T,
    profiles: SlotProfiles,
    active: Option<ActiveSession<T::Session>>,
    state: FailoverState,
    timer: BackToPrimaryTimer,
    switch_delay: Duration,
    next_session: SessionId,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl<T: Transport> FailoverController<T> {
    pub fn new(
        transport: T,
        profiles: SlotProfiles,
        switch_delay: Duration,
        back_to_primary_minutes: u32,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            transport,
            profiles,
            active: None,
            state: FailoverState::Stopped,
            timer: BackToPrimaryTimer::new(back_to_primary_minutes),
            switch_delay,
            next_session: 1,
            events_tx,
        }
    }

    pub fn state(&self) -> FailoverState {
        self.state
    }

    pub fn active_slot(&self) -> Option<Slot> {
        self.state.slot()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.active.as_ref().map(|active| active.id)
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.active.as_ref().map(|active| &active.endpoint)
    }

    pub fn session_mut(&mut self) -> Option<&mut T::Session> {
        self.active.as_mut().map(|active| &mut active.session)
    }

    pub fn profiles(&self) -> &SlotProfiles {
        &self.profiles
    }

    pub fn timer(&self) -> &BackToPrimaryTimer {
        &self.timer
    }

    /// Bring the lifecycle in line with `selection`
    ///
    /// Returns the transition that was carried out. On error the state is
    /// left as it was before the failing call, except that a switch whose
    /// start half fails ends stopped.
    pub async fn reconcile(
        &mut self,
        selection: Selection,
        gateway: Option<IpAddr>,
    ) -> LinkResult<Transition> {
        let transition = Transition::plan(self.state, selection);
        debug!(state = %self.state, ?selection, ?transition, "Reconciling broker selection");

        match transition {
            Transition::None => {}
            Transition::Start(slot) => self.start(slot, gateway).await?,
            Transition::Switch { from, to } => {
                info!(from = %from, to = %to, "Switching broker");
                self.stop().await?;
                if !self.switch_delay.is_zero() {
                    tokio::time::sleep(self.switch_delay).await;
                }
                self.start(to, gateway).await?;
            }
            Transition::Suspend(slot) => {
                let session = self.require_session()?;
                session.suspend().await.map_err(lifecycle_failure)?;
                self.state = FailoverState::Suspended(slot);
                info!(slot = %slot, "Broker session suspended");
            }
            Transition::Resume(slot) => {
                let session = self.require_session()?;
                session.resume().await.map_err(lifecycle_failure)?;
                self.state = FailoverState::Started(slot);
                if slot == Slot::Reserved && !self.timer.is_running() {
                    self.timer.start();
                }
                info!(slot = %slot, "Broker session resumed");
            }
        }

        Ok(transition)
    }

    /// Advance the return-to-primary countdown by one minute
    ///
    /// Only counts while the reserved broker is the active slot.
    pub fn tick(&mut self) -> bool {
        if self.state.slot() != Some(Slot::Reserved) {
            return false;
        }
        let fired = self.timer.tick();
        if fired {
            info!("Return-to-primary countdown expired");
        } else if let Some(elapsed) = self.timer.elapsed() {
            debug!(elapsed_minutes = elapsed, "Return-to-primary countdown");
        }
        fired
    }

    /// Stop any session and cancel the countdown
    pub async fn shutdown(&mut self) -> LinkResult<()> {
        self.timer.cancel();
        if self.active.is_some() {
            self.stop().await?;
        }
        Ok(())
    }

    async fn start(&mut self, slot: Slot, gateway: Option<IpAddr>) -> LinkResult<()> {
        let profile = self
            .profiles
            .get(slot)
            .ok_or(LinkError::SlotNotConfigured { slot })?;

        let host = profile.resolve_host(gateway).ok_or_else(|| {
            LinkError::transport_startup(
                slot,
                TransportError::Configure("gateway address is not known yet".to_string()),
            )
        })?;
        let endpoint = Endpoint {
            host,
            port: profile.port,
        };

        let id = self.next_session;
        self.next_session += 1;
        let sink = EventSink::new(id, self.events_tx.clone());

        let mut session = self
            .transport
            .configure(profile, &endpoint.host, sink)
            .await
            .map_err(|e| LinkError::transport_startup(slot, e))?;

        if let Err(e) = session.start().await {
            error!(slot = %slot, endpoint = %endpoint, error = %e, "Failed to start broker session");
            return Err(LinkError::transport_startup(slot, e));
        }

        info!(slot = %slot, endpoint = %endpoint, session = id, "Broker session started");
        self.active = Some(ActiveSession {
            id,
            session,
            endpoint,
        });
        self.state = FailoverState::Started(slot);

        match slot {
            Slot::Reserved => self.timer.start(),
            Slot::Primary => self.timer.cancel(),
        }
        Ok(())
    }

    async fn stop(&mut self) -> LinkResult<()> {
        let Some(active) = self.active.as_mut() else {
            self.state = FailoverState::Stopped;
            return Ok(());
        };

        if let Err(e) = active.session.stop().await {
            warn!(session = active.id, error = %e, "Failed to stop broker session");
            return Err(LinkError::TransportLifecycle(e));
        }

        debug!(session = active.id, "Broker session stopped");
        self.active = None;
        self.state = FailoverState::Stopped;
        Ok(())
    }

    fn require_session(&mut self) -> LinkResult<&mut T::Session> {
        self.active
            .as_mut()
            .map(|active| &mut active.session)
            .ok_or(LinkError::TransportLifecycle(TransportError::NotRunning))
    }
}

fn lifecycle_failure(error: TransportError) -> LinkError {
    error!(error = %error, "Transport lifecycle call failed");
    LinkError::TransportLifecycle(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::testing::{MockOp, MockTransport, TransportCall};
    use std::net::Ipv4Addr;

    fn controller(transport: MockTransport) -> FailoverController<MockTransport> {
        let config = LinkConfig::test_config();
        let profiles = SlotProfiles::from_config(&config).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        FailoverController::new(transport, profiles, Duration::ZERO, 5, tx)
    }

    #[test]
    fn test_plan_table() {
        use FailoverState::*;
        use Slot::*;

        let cases = [
            (Stopped, Selection::Primary, Transition::Start(Primary)),
            (Stopped, Selection::Reserved, Transition::Start(Reserved)),
            (Stopped, Selection::None, Transition::None),
            (Started(Primary), Selection::Primary, Transition::None),
            (
                Started(Primary),
                Selection::Reserved,
                Transition::Switch {
                    from: Primary,
                    to: Reserved,
                },
            ),
            (Started(Primary), Selection::None, Transition::Suspend(Primary)),
            (
                Started(Reserved),
                Selection::Primary,
                Transition::Switch {
                    from: Reserved,
                    to: Primary,
                },
            ),
            (Started(Reserved), Selection::Reserved, Transition::None),
            (Started(Reserved), Selection::None, Transition::Suspend(Reserved)),
            (Suspended(Primary), Selection::Primary, Transition::Resume(Primary)),
            (
                Suspended(Primary),
                Selection::Reserved,
                Transition::Switch {
                    from: Primary,
                    to: Reserved,
                },
            ),
            (Suspended(Primary), Selection::None, Transition::None),
            (
                Suspended(Reserved),
                Selection::Primary,
                Transition::Switch {
                    from: Reserved,
                    to: Primary,
                },
            ),
            (Suspended(Reserved), Selection::Reserved, Transition::Resume(Reserved)),
            (Suspended(Reserved), Selection::None, Transition::None),
        ];

        for (state, selection, expected) in cases {
            assert_eq!(
                Transition::plan(state, selection),
                expected,
                "state {state} selection {selection:?}"
            );
        }
    }

    #[test]
    fn test_timer_fires_once_per_threshold() {
        let mut timer = BackToPrimaryTimer::new(3);
        assert!(!timer.tick());

        timer.start();
        assert!(!timer.tick());
        assert!(!timer.tick());
        assert!(timer.tick());
        assert_eq!(timer.elapsed(), Some(0));
        assert!(timer.is_running());

        timer.cancel();
        assert!(!timer.tick());
    }

    #[test]
    fn test_zero_threshold_disables_timer() {
        let mut timer = BackToPrimaryTimer::new(0);
        timer.start();
        assert!(!timer.is_running());
        assert!(!timer.tick());
    }

    #[tokio::test]
    async fn test_start_primary() {
        let mock = MockTransport::new();
        let mut failover = controller(mock.clone());

        let transition = failover.reconcile(Selection::Primary, None).await.unwrap();

        assert_eq!(transition, Transition::Start(Slot::Primary));
        assert_eq!(failover.state(), FailoverState::Started(Slot::Primary));
        assert_eq!(failover.session_id(), Some(1));
        assert_eq!(failover.endpoint().unwrap().to_string(), "primary.local:1883");
        assert!(!failover.timer().is_running());
        assert_eq!(
            mock.calls().await,
            vec![
                TransportCall::Configure {
                    slot: Slot::Primary,
                    host: "primary.local".to_string()
                },
                TransportCall::Start,
            ]
        );
    }

    #[tokio::test]
    async fn test_switch_stops_before_starting() {
        let mock = MockTransport::new();
        let mut failover = controller(mock.clone());
        failover.reconcile(Selection::Primary, None).await.unwrap();
        mock.clear_calls().await;

        let transition = failover.reconcile(Selection::Reserved, None).await.unwrap();

        assert_eq!(
            transition,
            Transition::Switch {
                from: Slot::Primary,
                to: Slot::Reserved
            }
        );
        assert_eq!(failover.session_id(), Some(2));
        assert!(failover.timer().is_running());
        assert_eq!(
            mock.calls().await,
            vec![
                TransportCall::Stop,
                TransportCall::Configure {
                    slot: Slot::Reserved,
                    host: "reserved.example.com".to_string()
                },
                TransportCall::Start,
            ]
        );
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let mock = MockTransport::new();
        let mut failover = controller(mock.clone());
        failover.reconcile(Selection::Reserved, None).await.unwrap();

        let transition = failover.reconcile(Selection::None, None).await.unwrap();
        assert_eq!(transition, Transition::Suspend(Slot::Reserved));
        assert_eq!(failover.state(), FailoverState::Suspended(Slot::Reserved));
        assert!(failover.session_id().is_some());

        let transition = failover.reconcile(Selection::Reserved, None).await.unwrap();
        assert_eq!(transition, Transition::Resume(Slot::Reserved));
        assert_eq!(failover.state(), FailoverState::Started(Slot::Reserved));
    }

    #[tokio::test]
    async fn test_failed_start_leaves_stopped() {
        let mock = MockTransport::new();
        mock.fail_on(MockOp::Start).await;
        let mut failover = controller(mock.clone());

        let result = failover.reconcile(Selection::Primary, None).await;

        assert!(matches!(
            result,
            Err(LinkError::TransportStartup {
                slot: Slot::Primary,
                ..
            })
        ));
        assert_eq!(failover.state(), FailoverState::Stopped);
        assert!(failover.session_id().is_none());
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_session() {
        let mock = MockTransport::new();
        let mut failover = controller(mock.clone());
        failover.reconcile(Selection::Primary, None).await.unwrap();
        mock.fail_on(MockOp::Stop).await;

        let result = failover.reconcile(Selection::Reserved, None).await;

        assert!(matches!(result, Err(LinkError::TransportLifecycle(_))));
        assert_eq!(failover.state(), FailoverState::Started(Slot::Primary));
        assert_eq!(failover.session_id(), Some(1));
    }

    #[tokio::test]
    async fn test_switch_with_failed_start_ends_stopped() {
        let mock = MockTransport::new();
        let mut failover = controller(mock.clone());
        failover.reconcile(Selection::Primary, None).await.unwrap();
        mock.fail_on(MockOp::Start).await;

        let result = failover.reconcile(Selection::Reserved, None).await;

        assert!(result.is_err());
        assert_eq!(failover.state(), FailoverState::Stopped);
    }

    #[tokio::test]
    async fn test_gateway_host_requires_link_gateway() {
        let mut config = LinkConfig::test_config();
        config.primary.kind = crate::config::BrokerKind::Gateway;
        let profiles = SlotProfiles::from_config(&config).unwrap();
        let mock = MockTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut failover = FailoverController::new(mock.clone(), profiles, Duration::ZERO, 5, tx);

        assert!(failover.reconcile(Selection::Primary, None).await.is_err());
        assert!(mock.calls().await.is_empty());

        let gateway = IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1));
        failover
            .reconcile(Selection::Primary, Some(gateway))
            .await
            .unwrap();
        assert_eq!(failover.endpoint().unwrap().host, "192.168.4.1");
    }

    #[tokio::test]
    async fn test_tick_counts_only_on_reserved() {
        let mock = MockTransport::new();
        let mut failover = controller(mock);

        failover.reconcile(Selection::Primary, None).await.unwrap();
        assert!(!failover.tick());

        failover.reconcile(Selection::Reserved, None).await.unwrap();
        let fired: Vec<bool> = (0..5).map(|_| failover.tick()).collect();
        assert_eq!(fired, vec![false, false, false, false, true]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_session() {
        let mock = MockTransport::new();
        let mut failover = controller(mock.clone());
        failover.reconcile(Selection::Reserved, None).await.unwrap();

        failover.shutdown().await.unwrap();

        assert_eq!(failover.state(), FailoverState::Stopped);
        assert!(!failover.timer().is_running());
        assert_eq!(mock.calls().await.last(), Some(&TransportCall::Stop));
    }
}
