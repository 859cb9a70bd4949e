//! Error types for the realtime connection layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::{
    AUTH_RENEWAL_FAILED, CONNECTION_CLOSED, CONNECTION_SUSPENDED, CONNECTION_TIMED_OUT,
    DISCONNECTED, MESSAGE_NOT_ACKNOWLEDGED, TOKEN_ERROR_RANGE_END, TOKEN_ERROR_RANGE_START,
    UNABLE_TO_RECOVER,
};
use crate::connection::ConnectionStateKind;
use crate::transport::TransportError;

/// How the connection state machine reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The credential expired or was rejected; renewal may help.
    CredentialExpiry,
    /// Host, version or permission mismatch. Never retried automatically.
    Fatal,
    /// Network or server-side failure. Retried with backoff and fallback.
    Transient,
}

/// Protocol-level error as carried in `error` fields and state changes.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{message} (code {code}, status {status_code})")]
pub struct ErrorInfo {
    /// Service error code.
    pub code: u32,
    /// HTTP-like status code.
    #[serde(default)]
    pub status_code: u16,
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
    /// Link to documentation for this error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl ErrorInfo {
    /// Create a new error.
    pub fn new(code: u32, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            status_code,
            message: message.into(),
            href: None,
        }
    }

    /// Classify this error for the state machine.
    pub fn class(&self) -> ErrorClass {
        if self.is_credential_error() {
            ErrorClass::CredentialExpiry
        } else if (400..500).contains(&self.status_code) {
            ErrorClass::Fatal
        } else {
            ErrorClass::Transient
        }
    }

    /// Check if this error is in the credential-expiry range.
    pub fn is_credential_error(&self) -> bool {
        (TOKEN_ERROR_RANGE_START..TOKEN_ERROR_RANGE_END).contains(&self.code)
    }

    /// Transport dropped or server asked the client to reconnect.
    pub fn disconnected() -> Self {
        Self::new(DISCONNECTED, 503, "connection to server lost")
    }

    /// Connection attempt exceeded the realtime request timeout.
    pub fn connection_timed_out() -> Self {
        Self::new(CONNECTION_TIMED_OUT, 504, "connection attempt timed out")
    }

    /// Connection-state TTL elapsed while reconnecting.
    pub fn suspended() -> Self {
        Self::new(
            CONNECTION_SUSPENDED,
            503,
            "connection unavailable for longer than the connection state TTL",
        )
    }

    /// Connection closed by the client.
    pub fn closed() -> Self {
        Self::new(CONNECTION_CLOSED, 400, "connection closed")
    }

    /// Previous session could not be resumed.
    pub fn unable_to_recover() -> Self {
        Self::new(UNABLE_TO_RECOVER, 400, "unable to resume previous connection")
    }

    /// Message was never acknowledged by the server.
    pub fn not_acknowledged(cause: &ErrorInfo) -> Self {
        Self::new(
            MESSAGE_NOT_ACKNOWLEDGED,
            cause.status_code,
            format!("message not acknowledged: {}", cause.message),
        )
    }

    /// Renewal bridge failed without reporting its own error.
    pub fn renewal_failed(message: impl Into<String>) -> Self {
        Self::new(AUTH_RENEWAL_FAILED, 401, message)
    }
}

/// Internal bookkeeping errors of the acknowledgement processor.
///
/// These indicate a bug or a protocol violation, never a network condition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AckError {
    /// A confirmation covered a serial that was already resolved.
    #[error("serial {0} was already resolved")]
    AlreadyResolved(u64),

    /// A confirmation covered a serial that was never sent.
    #[error("serial {0} was never sent")]
    UnknownSerial(u64),

    /// An entry was registered twice with the same serial.
    #[error("serial {0} is already pending")]
    DuplicateSerial(u64),
}

/// Top-level connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Error reported by the service or by the state machine.
    #[error("{0}")]
    Protocol(#[from] ErrorInfo),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation is not allowed in the current state.
    #[error("operation not permitted while {0}")]
    InvalidState(ConnectionStateKind),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The connection manager task is no longer running.
    #[error("connection manager has shut down")]
    ManagerGone,
}

/// Result type for connection operations.
pub type Result<T, E = ConnectionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(ErrorInfo::new(40142, 401, "expired").class(), ErrorClass::CredentialExpiry);
        assert_eq!(ErrorInfo::new(40140, 401, "token").class(), ErrorClass::CredentialExpiry);
        assert_eq!(ErrorInfo::new(40160, 401, "denied").class(), ErrorClass::Fatal);
        assert_eq!(ErrorInfo::new(40000, 400, "bad request").class(), ErrorClass::Fatal);
        assert_eq!(ErrorInfo::new(50000, 500, "internal").class(), ErrorClass::Transient);
        assert_eq!(ErrorInfo::disconnected().class(), ErrorClass::Transient);
        assert_eq!(ErrorInfo::connection_timed_out().class(), ErrorClass::Transient);
    }

    #[test]
    fn test_error_info_json() {
        let json = r#"{"code":40142,"statusCode":401,"message":"Token expired"}"#;
        let error: ErrorInfo = serde_json::from_str(json).unwrap();
        assert_eq!(error, ErrorInfo::new(40142, 401, "Token expired"));
        assert_eq!(serde_json::to_string(&error).unwrap(), json);
    }

    #[test]
    fn test_error_info_display() {
        let error = ErrorInfo::new(80003, 503, "gone");
        assert_eq!(error.to_string(), "gone (code 80003, status 503)");
    }

    #[test]
    fn test_not_acknowledged_keeps_status() {
        let error = ErrorInfo::not_acknowledged(&ErrorInfo::closed());
        assert_eq!(error.code, MESSAGE_NOT_ACKNOWLEDGED);
        assert_eq!(error.status_code, 400);
    }
}
