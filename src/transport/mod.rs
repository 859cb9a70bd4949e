//! Transport layer.
//!
//! The connection manager talks to the network only through the
//! [`Transport`] / [`TransportFactory`] contracts defined here:
//!
//! - **Contracts**: [`Transport`], [`TransportFactory`], [`TransportListener`]
//! - **Parameters**: [`TransportParams`] with host, TLS, protocol version,
//!   resume/recover key, last serial and credential
//! - **WebSocket**: [`WebSocketTransportFactory`] (feature `websocket`)
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Connection Manager              │
//! ├─────────────────────────────────────────┤
//! │         Transport contract              │  ← This module
//! ├─────────────────────────────────────────┤
//! │   WebSocket (JSON frames) / custom      │
//! └─────────────────────────────────────────┘
//! ```

mod error;
mod handle;
mod params;
#[cfg(feature = "websocket")]
mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use error::*;
pub use handle::*;
pub use params::*;
#[cfg(feature = "websocket")]
#[cfg_attr(docsrs, doc(cfg(feature = "websocket")))]
pub use websocket::{WebSocketTransport, WebSocketTransportFactory};
