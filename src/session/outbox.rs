//! Outgoing queue for non-forced publishes
//!
//! Messages wait here until the next flush. A newer payload for a topic that
//! is already queued replaces the older one in place, so a slow link only
//! ever carries the latest value per topic.

use crate::protocol::QosLevel;
use bytes::Bytes;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub retain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// An older payload for the same topic was replaced
    Coalesced,
    /// Queue is at capacity and the topic is not queued
    Full,
}

#[derive(Debug)]
pub struct Outbox {
    capacity: usize,
    queue: VecDeque<OutgoingMessage>,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity),
        }
    }

    pub fn enqueue(&mut self, message: OutgoingMessage) -> EnqueueOutcome {
        if let Some(queued) = self.queue.iter_mut().find(|m| m.topic == message.topic) {
            *queued = message;
            return EnqueueOutcome::Coalesced;
        }
        if self.queue.len() >= self.capacity {
            return EnqueueOutcome::Full;
        }
        self.queue.push_back(message);
        EnqueueOutcome::Queued
    }

    pub fn pop(&mut self) -> Option<OutgoingMessage> {
        self.queue.pop_front()
    }

    /// Put a message back at the head after a failed send
    pub fn requeue_front(&mut self, message: OutgoingMessage) {
        self.queue.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
