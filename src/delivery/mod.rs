//! Outbound message delivery: acknowledgement tracking and the pre-connect
//! queue.

mod ack;
mod queue;

pub use ack::{AckFuture, AckTracker, Completion, Confirmation, PendingMessage};
pub use queue::{OutboundQueue, QueuedMessage};
