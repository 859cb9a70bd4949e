//! Transport layer error types.

use std::io;

use thiserror::Error;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport is not open for sending.
    #[error("transport is not connected")]
    NotConnected,

    /// The endpoint could not be turned into a connection URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The message could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// No async runtime is available to drive the transport.
    #[error("no async runtime available: {0}")]
    NoRuntime(String),

    /// Network I/O failed while setting up the transport.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Check if retrying can never succeed. Network failures are not fatal;
    /// the connection retries them with backoff and fallback hosts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::InvalidEndpoint(_) | TransportError::NoRuntime(_)
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
