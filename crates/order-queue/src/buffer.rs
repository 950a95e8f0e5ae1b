//! Local message buffer filled by the event-driven listener.
//!
//! The buffer belongs to the client that owns it; clones share the same
//! storage so the listener task and the receive path see one queue.

use crate::message::OrderMessage;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;

/// Thread-safe FIFO of decoded orders
#[derive(Debug, Clone, Default)]
pub struct MessageBuffer {
    messages: Arc<Mutex<VecDeque<OrderMessage>>>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn messages(&self) -> MutexGuard<'_, VecDeque<OrderMessage>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, message: OrderMessage) {
        self.messages().push_back(message);
    }

    /// Take the oldest message without waiting
    pub fn pop(&self) -> Option<OrderMessage> {
        self.messages().pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages().is_empty()
    }

    /// Take every buffered message, oldest first
    pub fn drain(&self) -> Vec<OrderMessage> {
        self.messages().drain(..).collect()
    }
}
