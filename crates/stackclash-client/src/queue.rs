//! Bounded FIFO of messages waiting for a connection.

use std::collections::VecDeque;

use stackclash_protocol::ClientMessage;

/// Holds outbound messages while the client is offline.
///
/// When full, pushing drops the oldest entry and returns it so the caller
/// can report the loss.
#[derive(Debug)]
pub struct OfflineQueue {
    items: VecDeque<ClientMessage>,
    capacity: usize,
    dropped: u64,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Appends `msg`; returns the evicted message if the queue was full.
    pub fn push(&mut self, msg: ClientMessage) -> Option<ClientMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            tracing::warn!(
                kind = old.kind(),
                capacity = self.capacity,
                total_dropped = self.dropped,
                "offline queue full, dropped oldest message"
            );
        }
        self.items.push_back(msg);
        evicted
    }

    pub fn pop_front(&mut self) -> Option<ClientMessage> {
        self.items.pop_front()
    }

    /// Puts back a message that could not be flushed. It stays first in line.
    pub fn push_front(&mut self, msg: ClientMessage) {
        if self.items.len() >= self.capacity {
            self.items.pop_back();
            self.dropped += 1;
        }
        self.items.push_front(msg);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages evicted over the queue's lifetime.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
