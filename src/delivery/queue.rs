//! Messages held back until the connection is established.

use std::collections::VecDeque;

use super::ack::Completion;
use crate::core::ErrorInfo;
use crate::protocol::ProtocolMessage;

/// A message waiting for the connection, in submission order.
#[derive(Debug)]
pub struct QueuedMessage {
    /// The message; its serial is assigned when it is transmitted.
    pub message: ProtocolMessage,
    /// Caller-visible completion.
    pub completion: Completion,
}

/// FIFO of messages submitted while the connection could not transmit.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<QueuedMessage>,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&mut self, message: ProtocolMessage, completion: Completion) {
        self.entries.push_back(QueuedMessage {
            message,
            completion,
        });
    }

    /// Take every queued message, oldest first.
    pub fn drain(&mut self) -> Vec<QueuedMessage> {
        self.entries.drain(..).collect()
    }

    /// Fail every queued message with `error`.
    pub fn fail_all(&mut self, error: &ErrorInfo) -> usize {
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            entry.completion.resolve(Err(error.clone()));
        }
        count
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
