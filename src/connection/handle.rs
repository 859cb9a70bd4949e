//! Public connection handle.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use super::manager::{Command, ConnectionManager, ConnectionSnapshot};
use super::options::ClientOptions;
use super::state::{ConnectionStateChange, ConnectionStateKind};
use crate::auth::AuthOptions;
use crate::core::{ConnectionError, ErrorInfo, Result};
use crate::delivery::{AckFuture, Completion};
use crate::protocol::{ConnectionDetails, ProtocolMessage, RecoveryKey};
use crate::transport::{TransportError, TransportFactory};

/// A realtime connection.
///
/// Creating a connection spawns its manager task on the current tokio
/// runtime. The handle only sends commands to that task and reads the state
/// it publishes; dropping the handle shuts the task down.
///
/// # Example
///
/// ```ignore
/// use realtime_connection::prelude::*;
///
/// let options = ClientOptions::builder()
///     .default_host("realtime.example.net")
///     .build();
/// let (connection, mut inbound) = Connection::websocket(options, AuthOptions::none())?;
///
/// connection.wait_for_state(ConnectionStateKind::Connected).await?;
/// connection.send(ProtocolMessage::message("news", vec![json!("hello")])).await?;
///
/// while let Some(message) = inbound.recv().await {
///     // Hand over to the channel layer
/// }
/// ```
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    events: broadcast::Sender<ConnectionStateChange>,
    ping_timeout: Duration,
    recovered_channel_serials: BTreeMap<String, String>,
}

impl Connection {
    /// Create a connection using `factory` for transports. Connects at once
    /// when `auto_connect` is set.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        options: ClientOptions,
        factory: Arc<dyn TransportFactory>,
        auth: AuthOptions,
    ) -> Result<(Self, InboundMessages)> {
        let options = options.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::NoRuntime(e.to_string()))?;

        let auto_connect = options.auto_connect;
        let ping_timeout = options.realtime_request_timeout;
        let (manager, endpoints) = ConnectionManager::new(options, factory, auth);
        runtime.spawn(manager.run());

        let connection = Self {
            commands: endpoints.commands,
            snapshot: endpoints.snapshot,
            events: endpoints.events,
            ping_timeout,
            recovered_channel_serials: endpoints.recovered_channel_serials,
        };
        if auto_connect {
            connection.connect();
        }
        Ok((
            connection,
            InboundMessages {
                rx: endpoints.inbound,
            },
        ))
    }

    /// Create a connection over the default WebSocket transport.
    #[cfg(feature = "websocket")]
    #[cfg_attr(docsrs, doc(cfg(feature = "websocket")))]
    pub fn websocket(options: ClientOptions, auth: AuthOptions) -> Result<(Self, InboundMessages)> {
        Self::new(
            options,
            Arc::new(crate::transport::WebSocketTransportFactory),
            auth,
        )
    }

    /// Connect. Does nothing while connecting, connected or closing.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Close. The connection reaches `Closed` within the force-close timeout
    /// even if the server never confirms.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Send a message. The returned future completes when the server
    /// acknowledges it, or fails with the reason it never will be.
    ///
    /// Messages sent before the connection is established are queued and
    /// transmitted in order once it is.
    pub fn send(&self, message: ProtocolMessage) -> AckFuture {
        let (completion, future) = Completion::new();
        // On failure the completion is dropped and the future reports the
        // manager as gone.
        let _ = self.commands.send(Command::Send {
            message,
            completion,
        });
        future
    }

    /// Round-trip a heartbeat. Only valid while connected.
    pub async fn ping(&self) -> Result<Duration> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Ping { reply })
            .map_err(|_| ConnectionError::ManagerGone)?;
        match tokio::time::timeout(self.ping_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::ManagerGone),
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionStateKind {
        self.snapshot.borrow().state
    }

    /// Connection id, once connected.
    pub fn id(&self) -> Option<String> {
        self.snapshot.borrow().id.clone()
    }

    /// Resumption key, once connected.
    pub fn key(&self) -> Option<String> {
        self.snapshot.borrow().key.clone()
    }

    /// Last inbound connection serial.
    pub fn serial(&self) -> Option<u64> {
        self.snapshot.borrow().serial
    }

    /// Serial the next outbound message will carry.
    pub fn message_serial(&self) -> u64 {
        self.snapshot.borrow().message_serial
    }

    /// Last error associated with the connection.
    pub fn error_reason(&self) -> Option<ErrorInfo> {
        self.snapshot.borrow().error_reason.clone()
    }

    /// Details the server sent on connect.
    pub fn details(&self) -> Option<ConnectionDetails> {
        self.snapshot.borrow().details.clone()
    }

    /// Host of the current or most recent attempt.
    pub fn host(&self) -> Option<String> {
        self.snapshot.borrow().host.clone()
    }

    /// Fallback host that connected recently, preferred for non-realtime
    /// requests until its preference expires.
    pub fn preferred_host(&self) -> Option<String> {
        self.snapshot
            .borrow()
            .preferred_host
            .as_ref()
            .filter(|(_, until)| Instant::now() < *until)
            .map(|(host, _)| host.clone())
    }

    /// Full published state.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to state changes. A receiver that falls behind by more than
    /// the configured capacity loses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStateChange> {
        self.events.subscribe()
    }

    /// Wait until the connection is in `state`.
    ///
    /// Only the latest published state is observed, so a state the
    /// connection passes through quickly (such as `Disconnected` with an
    /// immediate retry) can be missed. Use [`Connection::subscribe`] to see
    /// every change.
    pub async fn wait_for_state(&self, state: ConnectionStateKind) -> Result<()> {
        let mut snapshot = self.snapshot.clone();
        snapshot
            .wait_for(|current| current.state == state)
            .await
            .map(|_| ())
            .map_err(|_| ConnectionError::ManagerGone)
    }

    /// Recovery key for resuming this session in a new client instance.
    /// `None` when there is no session to recover.
    pub fn create_recovery_key(&self) -> Option<String> {
        let snapshot = self.snapshot.borrow();
        match snapshot.state {
            ConnectionStateKind::Closing
            | ConnectionStateKind::Closed
            | ConnectionStateKind::Failed
            | ConnectionStateKind::Suspended => None,
            _ => snapshot.key.as_ref().map(|key| {
                RecoveryKey::new(key.clone(), snapshot.message_serial)
                    .with_channel_serials(snapshot.channel_serials.clone())
                    .encode()
            }),
        }
    }

    /// Channel serials carried by the recovery key this connection was
    /// created with.
    pub fn recovered_channel_serials(&self) -> &BTreeMap<String, String> {
        &self.recovered_channel_serials
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot.borrow();
        f.debug_struct("Connection")
            .field("state", &snapshot.state)
            .field("id", &snapshot.id)
            .field("host", &snapshot.host)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Inbound channel-scoped messages, in arrival order.
#[derive(Debug)]
pub struct InboundMessages {
    rx: mpsc::UnboundedReceiver<ProtocolMessage>,
}

impl InboundMessages {
    /// Receive the next message. `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ProtocolMessage> {
        self.rx.recv().await
    }

    /// Receive a message if one is ready.
    pub fn try_recv(&mut self) -> Option<ProtocolMessage> {
        self.rx.try_recv().ok()
    }
}
