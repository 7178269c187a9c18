//! Event bus carrying lifecycle events to the rest of the application

use crate::protocol::LifecycleEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Sink for lifecycle events
///
/// `post` must not block: the controller calls it from its own task while
/// handling a callback.
pub trait EventBus: Send + Sync {
    fn post(&self, event: LifecycleEvent);

    /// Liveness hint for watchdogs; called on every transport callback
    fn activity(&self) {}
}

impl<B: EventBus + ?Sized> EventBus for Arc<B> {
    fn post(&self, event: LifecycleEvent) {
        (**self).post(event)
    }

    fn activity(&self) {
        (**self).activity()
    }
}

/// Event bus backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for BroadcastBus {
    fn post(&self, event: LifecycleEvent) {
        // No receivers is not an error: events are fire-and-forget
        if self.tx.send(event).is_err() {
            trace!("Lifecycle event dropped, no subscribers");
        }
    }
}
