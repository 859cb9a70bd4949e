//! Connection states and state-change events.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::ErrorInfo;

/// The current connection state, with the data each state needs to decide
/// its own transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, never connected.
    Initialized,
    /// A connection attempt is in progress.
    Connecting {
        /// Attempt is against a fallback host.
        fallback: bool,
        /// Waiting for the credential renewal bridge before dialing again.
        renewing: bool,
    },
    /// Connected to the service.
    Connected {
        /// The previous session was resumed.
        resumed: bool,
    },
    /// Temporarily disconnected; a retry is scheduled.
    Disconnected {
        /// The retry should use a fallback host.
        fallback: bool,
    },
    /// Disconnected for longer than the connection-state TTL.
    Suspended,
    /// An explicit close is in progress.
    Closing,
    /// Closed by the client.
    Closed,
    /// Failed with an error that is not retried automatically.
    Failed,
}

impl ConnectionState {
    /// The state tag.
    pub fn kind(&self) -> ConnectionStateKind {
        match self {
            ConnectionState::Initialized => ConnectionStateKind::Initialized,
            ConnectionState::Connecting { .. } => ConnectionStateKind::Connecting,
            ConnectionState::Connected { .. } => ConnectionStateKind::Connected,
            ConnectionState::Disconnected { .. } => ConnectionStateKind::Disconnected,
            ConnectionState::Suspended => ConnectionStateKind::Suspended,
            ConnectionState::Closing => ConnectionStateKind::Closing,
            ConnectionState::Closed => ConnectionStateKind::Closed,
            ConnectionState::Failed => ConnectionStateKind::Failed,
        }
    }
}

/// Tag of a [`ConnectionState`], as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStateKind {
    /// Created, never connected.
    Initialized,
    /// Connecting.
    Connecting,
    /// Connected.
    Connected,
    /// Temporarily disconnected.
    Disconnected,
    /// Disconnected for longer than the connection-state TTL.
    Suspended,
    /// Closing.
    Closing,
    /// Closed.
    Closed,
    /// Failed.
    Failed,
}

impl ConnectionStateKind {
    /// Whether messages can be queued for later transmission in this state.
    pub fn can_queue(&self) -> bool {
        matches!(
            self,
            ConnectionStateKind::Initialized
                | ConnectionStateKind::Connecting
                | ConnectionStateKind::Disconnected
        )
    }

    /// The error a send fails with in a state that neither transmits nor
    /// queues.
    pub fn send_error(&self) -> ErrorInfo {
        match self {
            ConnectionStateKind::Suspended => ErrorInfo::suspended(),
            ConnectionStateKind::Closing | ConnectionStateKind::Closed => ErrorInfo::closed(),
            ConnectionStateKind::Failed => {
                ErrorInfo::new(crate::core::CONNECTION_FAILED, 400, "connection failed")
            }
            _ => ErrorInfo::new(
                crate::core::CONNECTION_FAILED,
                400,
                format!("connection {} and message queueing is disabled", self),
            ),
        }
    }
}

impl fmt::Display for ConnectionStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStateKind::Initialized => "initialized",
            ConnectionStateKind::Connecting => "connecting",
            ConnectionStateKind::Connected => "connected",
            ConnectionStateKind::Disconnected => "disconnected",
            ConnectionStateKind::Suspended => "suspended",
            ConnectionStateKind::Closing => "closing",
            ConnectionStateKind::Closed => "closed",
            ConnectionStateKind::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Notification sent to observers on every state change.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStateChange {
    /// State before the change.
    pub previous: ConnectionStateKind,
    /// State after the change.
    pub current: ConnectionStateKind,
    /// Error that caused the change, if any.
    pub reason: Option<ErrorInfo>,
    /// Delay before the next automatic attempt, when one is scheduled.
    pub retry_in: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let state = ConnectionState::Disconnected { fallback: true };
        assert_eq!(state.kind(), ConnectionStateKind::Disconnected);
        assert_eq!(state.kind().to_string(), "disconnected");
        assert_eq!(
            serde_json::to_string(&ConnectionStateKind::Suspended).unwrap(),
            "\"suspended\""
        );
    }

    #[test]
    fn test_queueing_states() {
        assert!(ConnectionStateKind::Initialized.can_queue());
        assert!(ConnectionStateKind::Disconnected.can_queue());
        assert!(!ConnectionStateKind::Suspended.can_queue());
        assert!(!ConnectionStateKind::Failed.can_queue());
        assert_eq!(ConnectionStateKind::Closed.send_error(), ErrorInfo::closed());
    }
}
