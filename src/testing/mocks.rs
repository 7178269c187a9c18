//! Mock implementations for testing
//!
//! Provides a mock Transport that records every call in order and can be told
//! to fail specific operations, plus an EventBus that records what was posted.

use crate::broker::{BrokerProfile, Slot};
use crate::bus::EventBus;
use crate::protocol::{LifecycleEvent, QosLevel};
use crate::transport::{
    EventSink, MessageId, Transport, TransportError, TransportEventKind, TransportSession,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One call made against the mock transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Configure { slot: Slot, host: String },
    Start,
    Stop,
    Suspend,
    Resume,
    Publish {
        topic: String,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
        forced: bool,
    },
    Subscribe { topic: String, qos: QosLevel },
    Unsubscribe { topic: String },
}

impl TransportCall {
    pub fn is_lifecycle(&self) -> bool {
        !matches!(
            self,
            TransportCall::Publish { .. }
                | TransportCall::Subscribe { .. }
                | TransportCall::Unsubscribe { .. }
        )
    }
}

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Configure,
    Start,
    Stop,
    Suspend,
    Resume,
    Publish,
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<TransportCall>,
    failing: HashSet<MockOp>,
    sinks: Vec<EventSink>,
    next_message_id: MessageId,
}

impl MockState {
    fn record(&mut self, op: MockOp, call: TransportCall) -> Result<(), TransportError> {
        self.calls.push(call);
        if self.failing.contains(&op) {
            return Err(match op {
                MockOp::Configure => TransportError::Configure("mock configure failure".into()),
                MockOp::Start => TransportError::Start("mock start failure".into()),
                MockOp::Stop => TransportError::Stop("mock stop failure".into()),
                MockOp::Suspend => TransportError::Suspend("mock suspend failure".into()),
                MockOp::Resume => TransportError::Resume("mock resume failure".into()),
                MockOp::Publish | MockOp::Subscribe | MockOp::Unsubscribe => {
                    TransportError::Command("mock command failure".into())
                }
            });
        }
        Ok(())
    }

    fn message_id(&mut self) -> MessageId {
        self.next_message_id += 1;
        self.next_message_id
    }
}

/// Mock transport for testing
///
/// Clones share the same call trace, so a test keeps one clone and hands
/// the other to the controller.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `op` fail
    pub async fn fail_on(&self, op: MockOp) {
        self.state.lock().await.failing.insert(op);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failing.clear();
    }

    pub async fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn lifecycle_calls(&self) -> Vec<TransportCall> {
        self.calls()
            .await
            .into_iter()
            .filter(TransportCall::is_lifecycle)
            .collect()
    }

    pub async fn published(&self) -> Vec<TransportCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|call| matches!(call, TransportCall::Publish { .. }))
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Sink handed to the most recently configured session
    pub async fn last_sink(&self) -> Option<EventSink> {
        self.state.lock().await.sinks.last().cloned()
    }

    /// Emit an event as the most recently configured session
    pub async fn emit(&self, kind: TransportEventKind) -> bool {
        match self.last_sink().await {
            Some(sink) => sink.emit(kind),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Session = MockSession;

    async fn configure(
        &mut self,
        profile: &BrokerProfile,
        host: &str,
        sink: EventSink,
    ) -> Result<Self::Session, TransportError> {
        let mut state = self.state.lock().await;
        state.record(
            MockOp::Configure,
            TransportCall::Configure {
                slot: profile.slot,
                host: host.to_string(),
            },
        )?;
        state.sinks.push(sink);
        Ok(MockSession {
            state: self.state.clone(),
        })
    }
}

/// Session produced by [`MockTransport`]
#[derive(Debug)]
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl TransportSession for MockSession {
    async fn start(&mut self) -> Result<(), TransportError> {
        self.state
            .lock()
            .await
            .record(MockOp::Start, TransportCall::Start)
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        self.state.lock().await.record(MockOp::Stop, TransportCall::Stop)
    }

    async fn suspend(&mut self) -> Result<(), TransportError> {
        self.state
            .lock()
            .await
            .record(MockOp::Suspend, TransportCall::Suspend)
    }

    async fn resume(&mut self) -> Result<(), TransportError> {
        self.state
            .lock()
            .await
            .record(MockOp::Resume, TransportCall::Resume)
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        retain: bool,
        forced: bool,
    ) -> Result<MessageId, TransportError> {
        let mut state = self.state.lock().await;
        state.record(
            MockOp::Publish,
            TransportCall::Publish {
                topic: topic.to_string(),
                payload,
                qos,
                retain,
                forced,
            },
        )?;
        Ok(state.message_id())
    }

    async fn subscribe(&mut self, topic: &str, qos: QosLevel) -> Result<MessageId, TransportError> {
        let mut state = self.state.lock().await;
        state.record(
            MockOp::Subscribe,
            TransportCall::Subscribe {
                topic: topic.to_string(),
                qos,
            },
        )?;
        Ok(state.message_id())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<MessageId, TransportError> {
        let mut state = self.state.lock().await;
        state.record(
            MockOp::Unsubscribe,
            TransportCall::Unsubscribe {
                topic: topic.to_string(),
            },
        )?;
        Ok(state.message_id())
    }
}

/// Event bus that keeps everything posted to it
#[derive(Debug, Clone, Default)]
pub struct RecordingBus {
    events: Arc<std::sync::Mutex<Vec<LifecycleEvent>>>,
    activity: Arc<AtomicUsize>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of events whose [`LifecycleEvent::kind`] equals `kind`
    pub fn count(&self, kind: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }

    pub fn activity_count(&self) -> usize {
        self.activity.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl EventBus for RecordingBus {
    fn post(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    fn activity(&self) {
        self.activity.fetch_add(1, Ordering::SeqCst);
    }
}
