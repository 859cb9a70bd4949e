//! Connection parameters passed to a transport at creation.

use crate::auth::Credential;
use crate::core::{AGENT, PROTOCOL_VERSION};

/// How the new connection relates to a previous session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectMode {
    /// Start a fresh session.
    Clean,
    /// Resume this client's previous session.
    Resume {
        /// Connection key of the session.
        key: String,
        /// Last inbound connection serial seen.
        serial: Option<u64>,
    },
    /// Recover another client instance's session from a recovery key.
    Recover {
        /// Connection key from the recovery key.
        key: String,
    },
}

/// Parameters for one connection attempt.
#[derive(Debug, Clone)]
pub struct TransportParams {
    /// Host to connect to.
    pub host: String,
    /// Port to connect to.
    pub port: u16,
    /// Whether to use TLS.
    pub tls: bool,
    /// Protocol version.
    pub protocol_version: String,
    /// Library version string.
    pub agent: String,
    /// Session continuity mode.
    pub mode: ConnectMode,
    /// Access credential, if any.
    pub credential: Option<Credential>,
}

impl TransportParams {
    /// Create parameters for a clean connection to `host`.
    pub fn new(host: impl Into<String>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
            protocol_version: PROTOCOL_VERSION.to_string(),
            agent: AGENT.to_string(),
            mode: ConnectMode::Clean,
            credential: None,
        }
    }

    /// Query parameters for the connect request, in a stable order.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("v", self.protocol_version.clone()),
            ("agent", self.agent.clone()),
            ("format", "json".to_string()),
        ];

        if let Some(credential) = &self.credential {
            query.push(("accessToken", credential.token().to_string()));
        }

        match &self.mode {
            ConnectMode::Clean => {}
            ConnectMode::Resume { key, serial } => {
                query.push(("resume", key.clone()));
                if let Some(serial) = serial {
                    query.push(("connectionSerial", serial.to_string()));
                }
            }
            ConnectMode::Recover { key } => {
                query.push(("recover", key.clone()));
            }
        }

        query
    }

    /// Full WebSocket URL for the connect request.
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        let query = self
            .query()
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(&value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}://{}:{}/?{}", scheme, self.host, self.port, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_url() {
        let params = TransportParams::new("realtime.example.net", 443, true);
        let url = params.url();

        assert!(url.starts_with("wss://realtime.example.net:443/?v=2&agent="));
        assert!(url.ends_with("&format=json"));
        assert!(!url.contains("resume"));
    }

    #[test]
    fn test_resume_params() {
        let mut params = TransportParams::new("h", 80, false);
        params.mode = ConnectMode::Resume {
            key: "abc!def".into(),
            serial: Some(12),
        };

        let query = params.query();
        assert!(query.contains(&("resume", "abc!def".to_string())));
        assert!(query.contains(&("connectionSerial", "12".to_string())));
        assert!(params.url().contains("resume=abc%21def"));
    }

    #[test]
    fn test_recover_never_sends_message_serial() {
        let mut params = TransportParams::new("h", 80, false);
        params.mode = ConnectMode::Recover { key: "K".into() };

        let query = params.query();
        assert!(query.contains(&("recover", "K".to_string())));
        assert!(query.iter().all(|(name, _)| *name != "msgSerial"));
    }

    #[test]
    fn test_credential_in_query() {
        let mut params = TransportParams::new("h", 80, false);
        params.credential = Some(Credential::new("a b"));

        assert!(params.url().contains("accessToken=a%20b"));
    }

    #[test]
    fn test_query_values_are_percent_encoded() {
        let mut params = TransportParams::new("h", 80, false);
        params.credential = Some(Credential::new("a/b=c&d"));
        params.mode = ConnectMode::Recover {
            key: "plain-Key_1.2~".into(),
        };

        let url = params.url();
        assert!(url.contains("accessToken=a%2Fb%3Dc%26d"));
        assert!(url.contains("recover=plain-Key_1.2~"));
    }
}
