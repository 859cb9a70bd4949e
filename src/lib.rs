//! # Realtime Connection
//!
//! Connection layer of a realtime publish/subscribe client. It keeps a
//! single logical connection to the service alive across transport failures
//! and tracks delivery of outbound messages:
//!
//! - **State machine**: explicit connection states with a pure transition
//!   function, driven by one manager task
//! - **Reconnection**: retry with backoff and jitter, fallback hosts, and
//!   suspension once the connection-state TTL runs out
//! - **Delivery**: serial-numbered outbound messages resolved by
//!   acknowledgement ranges, queued while not connected, resent on resume
//! - **Recovery**: resume keys across transports, recovery keys across
//!   client instances
//! - **Authentication**: one credential renewal per failed episode through a
//!   pluggable bridge
//!
//! ## Feature Flags
//!
//! - `websocket` (default): WebSocket transport over `tokio-tungstenite`
//! - `tls`: `wss://` support for the WebSocket transport
//!
//! ## Modules
//!
//! - [`core`]: Constants and error types
//! - [`protocol`]: Protocol messages and recovery keys
//! - [`transport`]: Transport abstraction and the WebSocket transport
//! - [`auth`]: Credentials and the renewal bridge
//! - [`retry`]: Backoff and fallback host selection
//! - [`delivery`]: Acknowledgement tracking and the outbound queue
//! - [`connection`]: State machine, manager and the public handle
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use realtime_connection::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let options = ClientOptions::builder()
//!     .default_host("realtime.example.net")
//!     .fallback_hosts(["a.realtime.example.net", "b.realtime.example.net"])
//!     .build();
//! let auth = AuthOptions::token(Credential::new("token"));
//! let (connection, mut inbound) = Connection::websocket(options, auth)?;
//!
//! connection.wait_for_state(ConnectionStateKind::Connected).await?;
//! connection
//!     .send(ProtocolMessage::message("news", vec![serde_json::json!("hello")]))
//!     .await?;
//!
//! while let Some(message) = inbound.recv().await {
//!     println!("{:?}", message.channel);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod auth;
pub mod connection;
pub mod core;
pub mod delivery;
pub mod protocol;
pub mod retry;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::auth::{AuthOptions, AuthRenewal, Credential};
    pub use crate::connection::{
        ClientOptions, ClientOptionsBuilder, Connection, ConnectionSnapshot, ConnectionState,
        ConnectionStateChange, ConnectionStateKind, InboundMessages,
    };
    pub use crate::core::{ConnectionError, ErrorClass, ErrorInfo, Result};
    pub use crate::delivery::AckFuture;
    pub use crate::protocol::{Action, ConnectionDetails, ProtocolMessage, RecoveryKey};
    pub use crate::transport::{
        ConnectMode, Transport, TransportError, TransportEvent, TransportFactory,
        TransportListener, TransportParams, TransportResult, TransportState,
    };

    #[cfg(feature = "websocket")]
    pub use crate::transport::WebSocketTransportFactory;
}

// Re-export commonly used items at crate root
pub use connection::{ClientOptions, Connection, ConnectionStateKind};
pub use core::{ConnectionError, ErrorInfo, Result};
