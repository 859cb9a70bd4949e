//! Scripted in-memory transport for tests.
//!
//! Every transport the factory creates is handed to the test as a
//! [`MockRemote`], which plays the server side: open the transport, deliver
//! protocol messages, drop the connection, and inspect what was sent.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::error::{TransportError, TransportResult};
use super::handle::{Transport, TransportFactory, TransportListener, TransportState};
use super::params::TransportParams;
use crate::core::ErrorInfo;
use crate::protocol::ProtocolMessage;

#[derive(Debug)]
struct Shared {
    state: TransportState,
    sent: Vec<ProtocolMessage>,
    close_requested: bool,
}

/// Server side of a mock transport.
#[derive(Clone)]
pub(crate) struct MockRemote {
    pub params: TransportParams,
    listener: TransportListener,
    shared: Arc<Mutex<Shared>>,
}

impl MockRemote {
    pub fn host(&self) -> &str {
        &self.params.host
    }

    /// Open the transport.
    pub fn open(&self) {
        self.shared.lock().unwrap().state = TransportState::Connected;
        self.listener.state_changed(TransportState::Connected, None);
    }

    /// Open the transport and accept the connection.
    pub fn accept(&self, connection_id: &str, connection_key: &str) {
        self.open();
        self.deliver(ProtocolMessage::connected(connection_id, connection_key));
    }

    /// Deliver an inbound message.
    pub fn deliver(&self, message: ProtocolMessage) {
        self.listener.message(message);
    }

    /// Close the transport from the remote side.
    pub fn drop_connection(&self, error: Option<ErrorInfo>) {
        self.shared.lock().unwrap().state = TransportState::Closed;
        self.listener.state_changed(TransportState::Closed, error);
    }

    /// Messages the client has sent so far.
    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.shared.lock().unwrap().sent.clone()
    }

    /// Whether the client asked to close this transport.
    pub fn close_requested(&self) -> bool {
        self.shared.lock().unwrap().close_requested
    }
}

struct MockTransport {
    shared: Arc<Mutex<Shared>>,
}

impl Transport for MockTransport {
    fn send(&self, message: &ProtocolMessage) -> TransportResult<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.state != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        shared.sent.push(message.clone());
        Ok(())
    }

    fn close(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.close_requested = true;
        if shared.state == TransportState::Connected {
            shared.state = TransportState::Closing;
        }
    }

    fn state(&self) -> TransportState {
        self.shared.lock().unwrap().state
    }
}

/// Factory handing each created transport to the test.
pub(crate) struct MockFactory {
    created: mpsc::UnboundedSender<MockRemote>,
}

impl MockFactory {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        let (created, remotes) = mpsc::unbounded_channel();
        (Arc::new(Self { created }), remotes)
    }
}

impl TransportFactory for MockFactory {
    fn create(
        &self,
        params: TransportParams,
        listener: TransportListener,
    ) -> TransportResult<Box<dyn Transport>> {
        let shared = Arc::new(Mutex::new(Shared {
            state: TransportState::Connecting,
            sent: Vec::new(),
            close_requested: false,
        }));
        let remote = MockRemote {
            params,
            listener,
            shared: shared.clone(),
        };
        let _ = self.created.send(remote);
        Ok(Box::new(MockTransport { shared }))
    }
}
