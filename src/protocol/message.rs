//! Protocol message shape consumed and produced by the connection layer.
//!
//! Only `action`, `error` and the connection-identity fields matter here;
//! `messages` is opaque and handed to the channel layer untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ErrorInfo;

/// Protocol message action codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Action {
    /// Keepalive, or ping/pong when `id` is set.
    #[default]
    Heartbeat = 0,
    /// Positive acknowledgement of `count` messages from `msg_serial`.
    Ack = 1,
    /// Negative acknowledgement of `count` messages from `msg_serial`.
    Nack = 2,
    /// Client connect request.
    Connect = 3,
    /// Server accepted the connection.
    Connected = 4,
    /// Client disconnect request.
    Disconnect = 5,
    /// Server dropped the connection; the client should reconnect.
    Disconnected = 6,
    /// Client close request.
    Close = 7,
    /// Server confirmed the close.
    Closed = 8,
    /// Error; connection-wide when `channel` is absent.
    Error = 9,
    /// Channel attach request.
    Attach = 10,
    /// Channel attached.
    Attached = 11,
    /// Channel detach request.
    Detach = 12,
    /// Channel detached.
    Detached = 13,
    /// Presence payload.
    Presence = 14,
    /// Message payload.
    Message = 15,
    /// Presence sync.
    Sync = 16,
    /// In-band reauthentication.
    Auth = 17,
}

/// An action code outside the known range.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown protocol action {0}")]
pub struct UnknownAction(pub u8);

impl From<Action> for u8 {
    fn from(action: Action) -> u8 {
        action as u8
    }
}

impl TryFrom<u8> for Action {
    type Error = UnknownAction;

    fn try_from(value: u8) -> Result<Self, UnknownAction> {
        let action = match value {
            0 => Action::Heartbeat,
            1 => Action::Ack,
            2 => Action::Nack,
            3 => Action::Connect,
            4 => Action::Connected,
            5 => Action::Disconnect,
            6 => Action::Disconnected,
            7 => Action::Close,
            8 => Action::Closed,
            9 => Action::Error,
            10 => Action::Attach,
            11 => Action::Attached,
            12 => Action::Detach,
            13 => Action::Detached,
            14 => Action::Presence,
            15 => Action::Message,
            16 => Action::Sync,
            17 => Action::Auth,
            other => return Err(UnknownAction(other)),
        };
        Ok(action)
    }
}

/// Connection parameters the server assigns on `Connected`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    /// Resumption token for this connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_key: Option<String>,
    /// Client identity the credential is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Server override of the connection-state TTL, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state_ttl: Option<u64>,
    /// Maximum interval between server heartbeats, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_idle_interval: Option<u64>,
    /// Largest accepted message, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<u64>,
    /// Identifier of the server that accepted the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

/// A single protocol message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    /// Message action.
    pub action: Action,
    /// Message id (ping correlation for heartbeats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Channel name for channel-scoped messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Channel serial for channel-scoped messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_serial: Option<String>,
    /// Connection id assigned by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Inbound connection sequence number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_serial: Option<u64>,
    /// Outbound message serial (or first acknowledged serial on Ack/Nack).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_serial: Option<u64>,
    /// Number of messages covered by an Ack/Nack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Error attached to this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Connection details sent with `Connected`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_details: Option<ConnectionDetails>,
    /// Opaque payload for the channel layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<serde_json::Value>>,
}

impl ProtocolMessage {
    /// Create an empty message with the given action.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }

    /// Client close request.
    pub fn close() -> Self {
        Self::new(Action::Close)
    }

    /// Heartbeat carrying a ping id.
    pub fn heartbeat(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new(Action::Heartbeat)
        }
    }

    /// Channel message with opaque payloads.
    pub fn message(channel: impl Into<String>, messages: Vec<serde_json::Value>) -> Self {
        Self {
            channel: Some(channel.into()),
            messages: Some(messages),
            ..Self::new(Action::Message)
        }
    }

    /// Server acceptance of a connection.
    pub fn connected(connection_id: impl Into<String>, connection_key: impl Into<String>) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            connection_details: Some(ConnectionDetails {
                connection_key: Some(connection_key.into()),
                ..ConnectionDetails::default()
            }),
            ..Self::new(Action::Connected)
        }
    }

    /// Positive acknowledgement of `count` messages starting at `serial`.
    pub fn ack(serial: u64, count: u64) -> Self {
        Self {
            msg_serial: Some(serial),
            count: Some(count),
            ..Self::new(Action::Ack)
        }
    }

    /// Negative acknowledgement of `count` messages starting at `serial`.
    pub fn nack(serial: u64, count: u64, error: ErrorInfo) -> Self {
        Self {
            msg_serial: Some(serial),
            count: Some(count),
            error: Some(error),
            ..Self::new(Action::Nack)
        }
    }

    /// Connection-wide error.
    pub fn error(error: ErrorInfo) -> Self {
        Self {
            error: Some(error),
            ..Self::new(Action::Error)
        }
    }

    /// Server-initiated disconnect.
    pub fn disconnected(error: Option<ErrorInfo>) -> Self {
        Self {
            error,
            ..Self::new(Action::Disconnected)
        }
    }

    /// Whether this message concerns the connection rather than a channel.
    pub fn is_connection_scoped(&self) -> bool {
        self.channel.is_none()
    }

    /// Connection key from the connection details, if any.
    pub fn connection_key(&self) -> Option<&str> {
        self.connection_details
            .as_ref()
            .and_then(|details| details.connection_key.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes() {
        assert_eq!(u8::from(Action::Connected), 4);
        assert_eq!(Action::try_from(9).unwrap(), Action::Error);
        assert_eq!(Action::try_from(99), Err(UnknownAction(99)));
    }

    #[test]
    fn test_connected_message_json() {
        let json = r#"{
            "action": 4,
            "connectionId": "abc",
            "connectionSerial": 7,
            "connectionDetails": {"connectionKey": "abc!key", "connectionStateTtl": 60000}
        }"#;
        let msg: ProtocolMessage = serde_json::from_str(json).unwrap();

        assert_eq!(msg.action, Action::Connected);
        assert_eq!(msg.connection_id.as_deref(), Some("abc"));
        assert_eq!(msg.connection_serial, Some(7));
        assert_eq!(msg.connection_key(), Some("abc!key"));
        assert_eq!(
            msg.connection_details.unwrap().connection_state_ttl,
            Some(60000)
        );
    }

    #[test]
    fn test_ack_serializes_compactly() {
        let json = serde_json::to_string(&ProtocolMessage::ack(3, 2)).unwrap();
        assert_eq!(json, r#"{"action":1,"msgSerial":3,"count":2}"#);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result: Result<ProtocolMessage, _> = serde_json::from_str(r#"{"action":200}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_channel_error_is_not_connection_scoped() {
        let mut msg = ProtocolMessage::error(ErrorInfo::new(90001, 400, "channel failed"));
        assert!(msg.is_connection_scoped());

        msg.channel = Some("updates".into());
        assert!(!msg.is_connection_scoped());
    }
}
