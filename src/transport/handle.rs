//! Transport contracts.
//!
//! A transport is an opaque, bidirectional message conduit with its own
//! lifecycle. The connection manager owns exactly one at a time and is the
//! only caller of its methods; inbound messages and lifecycle changes flow
//! back through a [`TransportListener`].

use std::fmt;
use std::sync::Arc;

use super::error::TransportResult;
use super::params::TransportParams;
use crate::core::ErrorInfo;
use crate::protocol::ProtocolMessage;

/// Lifecycle of a single transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Created, not yet dialing.
    Initialized,
    /// Dialing the remote host.
    Connecting,
    /// Open for sending and receiving.
    Connected,
    /// Close requested, waiting for the remote side.
    Closing,
    /// Closed; no further events follow.
    Closed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::Initialized => "initialized",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Closing => "closing",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Event reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport changed lifecycle state. `error` explains an abnormal
    /// close.
    StateChanged {
        /// New state.
        state: TransportState,
        /// Cause, when the change was not requested.
        error: Option<ErrorInfo>,
    },
    /// A decoded inbound protocol message.
    Message(ProtocolMessage),
}

type EventSink = dyn Fn(u64, TransportEvent) + Send + Sync;

/// Callback handle a transport uses to report events.
///
/// Every listener is stamped with the generation of the transport it was
/// created for, so events from a transport that has since been replaced can
/// be told apart and discarded.
#[derive(Clone)]
pub struct TransportListener {
    generation: u64,
    sink: Arc<EventSink>,
}

impl TransportListener {
    /// Create a listener for the transport of the given generation.
    pub fn new<F>(generation: u64, sink: F) -> Self
    where
        F: Fn(u64, TransportEvent) + Send + Sync + 'static,
    {
        Self {
            generation,
            sink: Arc::new(sink),
        }
    }

    /// Generation this listener reports for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event.
    pub fn emit(&self, event: TransportEvent) {
        (self.sink)(self.generation, event);
    }

    /// Report a lifecycle change.
    pub fn state_changed(&self, state: TransportState, error: Option<ErrorInfo>) {
        self.emit(TransportEvent::StateChanged { state, error });
    }

    /// Report an inbound message.
    pub fn message(&self, message: ProtocolMessage) {
        self.emit(TransportEvent::Message(message));
    }
}

impl fmt::Debug for TransportListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportListener")
            .field("generation", &self.generation)
            .finish()
    }
}

/// An open (or opening) transport.
pub trait Transport: Send {
    /// Queue a message for transmission.
    fn send(&self, message: &ProtocolMessage) -> TransportResult<()>;

    /// Begin an orderly close. Idempotent.
    fn close(&self);

    /// Current lifecycle state.
    fn state(&self) -> TransportState;
}

/// Creates transports. Pluggable so alternate transports can be substituted.
pub trait TransportFactory: Send + Sync {
    /// Create a transport and start connecting it. Must not block; progress
    /// is reported through `listener`.
    fn create(
        &self,
        params: TransportParams,
        listener: TransportListener,
    ) -> TransportResult<Box<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_listener_stamps_generation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = TransportListener::new(7, move |generation, event| {
            sink.lock().unwrap().push((generation, event));
        });

        listener.state_changed(TransportState::Connected, None);
        listener.message(ProtocolMessage::heartbeat("p1"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(generation, _)| *generation == 7));
        assert_eq!(
            seen[0].1,
            TransportEvent::StateChanged {
                state: TransportState::Connected,
                error: None
            }
        );
    }
}
