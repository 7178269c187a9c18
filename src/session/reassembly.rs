//! Inbound fragment reassembly
//!
//! The transport delivers a large message as sequential fragments, each
//! carrying its offset and the total message length. At most one message is
//! in flight: an offset-0 fragment always starts over.

use crate::protocol::IncomingMessage;
use bytes::Bytes;
use tracing::{debug, warn};

/// Result of feeding one fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// More fragments are expected
    Pending,
    Complete(IncomingMessage),
    /// The fragment belongs to no message in progress
    Dropped,
    /// The buffer for a new message could not be allocated
    AllocationFailed { total_len: usize },
}

#[derive(Debug)]
struct PendingMessage {
    buffer: Vec<u8>,
    first_topic: String,
}

#[derive(Debug)]
pub struct Reassembler {
    max_message_size: usize,
    pending: Option<PendingMessage>,
}

impl Reassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            pending: None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any partial message
    pub fn reset(&mut self) {
        if self.pending.take().is_some() {
            debug!("Discarding partially received message");
        }
    }

    pub fn on_fragment(
        &mut self,
        offset: usize,
        data: &[u8],
        total_len: usize,
        topic: &str,
    ) -> FragmentOutcome {
        if offset == 0 {
            self.reset();
            match allocate(total_len, self.max_message_size) {
                Some(buffer) => {
                    self.pending = Some(PendingMessage {
                        buffer,
                        first_topic: topic.to_string(),
                    });
                }
                None => {
                    warn!(total_len, "Cannot allocate buffer for inbound message");
                    return FragmentOutcome::AllocationFailed { total_len };
                }
            }
        }

        let Some(pending) = self.pending.as_mut() else {
            debug!(offset, topic, "Dropping fragment with no message in progress");
            return FragmentOutcome::Dropped;
        };

        let buffer_len = pending.buffer.len();
        let start = offset.min(buffer_len);
        let end = offset.saturating_add(data.len()).min(buffer_len);
        if start < end {
            pending.buffer[start..end].copy_from_slice(&data[..end - start]);
        }

        if offset.saturating_add(data.len()) != total_len {
            return FragmentOutcome::Pending;
        }

        let Some(done) = self.pending.take() else {
            return FragmentOutcome::Dropped;
        };
        let topic = if topic.is_empty() {
            done.first_topic
        } else {
            topic.to_string()
        };
        FragmentOutcome::Complete(IncomingMessage {
            topic,
            payload: Bytes::from(done.buffer),
        })
    }
}

fn allocate(total_len: usize, max_message_size: usize) -> Option<Vec<u8>> {
    if total_len > max_message_size {
        return None;
    }
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(total_len).ok()?;
    buffer.resize(total_len, 0);
    Some(buffer)
}
