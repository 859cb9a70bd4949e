//! Recovery key: serialized session state that lets a new client instance
//! pick up where a previous one left off.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error decoding a recovery key.
#[derive(Debug, Error)]
#[error("invalid recovery key: {0}")]
pub struct RecoveryKeyError(#[from] serde_json::Error);

/// Session state carried from one client instance to the next.
///
/// Encodes as `{"connectionKey":..,"msgSerial":..,"channelSerials":{..}}`.
/// The message serial seeds the new client's outbound counter; only the
/// connection key is sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryKey {
    /// Connection key of the session being recovered.
    pub connection_key: String,
    /// Next outbound message serial.
    pub msg_serial: u64,
    /// Last serial seen per channel.
    #[serde(default)]
    pub channel_serials: BTreeMap<String, String>,
}

impl RecoveryKey {
    /// Create a key with no channel serials.
    pub fn new(connection_key: impl Into<String>, msg_serial: u64) -> Self {
        Self {
            connection_key: connection_key.into(),
            msg_serial,
            channel_serials: BTreeMap::new(),
        }
    }

    /// Attach channel serials.
    pub fn with_channel_serials(mut self, channel_serials: BTreeMap<String, String>) -> Self {
        self.channel_serials = channel_serials;
        self
    }

    /// Serialize to the string form handed to a new client.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse the string form.
    pub fn decode(key: &str) -> Result<Self, RecoveryKeyError> {
        Ok(serde_json::from_str(key)?)
    }
}

impl fmt::Display for RecoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let key = RecoveryKey::new("K", 45);
        assert_eq!(
            key.encode(),
            r#"{"connectionKey":"K","msgSerial":45,"channelSerials":{}}"#
        );
    }

    #[test]
    fn test_decode_with_channel_serials() {
        let key = RecoveryKey::decode(
            r#"{"connectionKey":"abc!def","msgSerial":3,"channelSerials":{"news":"n:12"}}"#,
        )
        .unwrap();

        assert_eq!(key.connection_key, "abc!def");
        assert_eq!(key.msg_serial, 3);
        assert_eq!(key.channel_serials.get("news").map(String::as_str), Some("n:12"));
    }

    #[test]
    fn test_decode_missing_channel_serials() {
        let key = RecoveryKey::decode(r#"{"connectionKey":"K","msgSerial":1}"#).unwrap();
        assert!(key.channel_serials.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(RecoveryKey::decode("not-a-key").is_err());
        assert!(RecoveryKey::decode(r#"{"msgSerial":1}"#).is_err());
    }
}
