//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::machine::Timeouts;
use crate::core::{
    CONNECTION_STATE_TTL, ConnectionError, DEFAULT_HOST, DEFAULT_TLS_PORT,
    DISCONNECTED_RETRY_TIMEOUT, FALLBACK_RETRY_TIMEOUT, FORCE_CLOSE_TIMEOUT,
    REALTIME_REQUEST_TIMEOUT, RETRY_CEILING, RETRY_FLOOR, STATE_EVENT_CAPACITY,
    SUSPENDED_RETRY_TIMEOUT,
};

/// Connection configuration.
///
/// Deserializes from camelCase keys with durations in milliseconds; missing
/// keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Host tried first.
    pub default_host: String,
    /// Alternate hosts tried after transient failures.
    pub fallback_hosts: Vec<String>,
    /// Service port.
    pub port: u16,
    /// Use TLS.
    pub tls: bool,
    /// Per-attempt timeout.
    #[serde(with = "millis")]
    pub realtime_request_timeout: Duration,
    /// Backoff base while disconnected.
    #[serde(with = "millis")]
    pub disconnected_retry_timeout: Duration,
    /// Retry interval while suspended.
    #[serde(with = "millis")]
    pub suspended_retry_timeout: Duration,
    /// How long reconnection may run before the connection is suspended.
    /// The server may override this on connect.
    #[serde(with = "millis")]
    pub connection_state_ttl: Duration,
    /// Upper bound on an orderly close.
    #[serde(with = "millis")]
    pub force_close_timeout: Duration,
    /// Smallest backoff delay.
    #[serde(with = "millis")]
    pub retry_floor: Duration,
    /// Largest backoff delay.
    #[serde(with = "millis")]
    pub retry_ceiling: Duration,
    /// How long a fallback host that connected stays preferred for
    /// non-realtime requests.
    #[serde(with = "millis")]
    pub fallback_retry_timeout: Duration,
    /// Connect as soon as the connection is created.
    pub auto_connect: bool,
    /// Queue messages sent before the connection is established.
    pub queue_messages: bool,
    /// Recovery key of a previous client instance.
    pub recover: Option<String>,
    /// Capacity of the state-change broadcast; slow observers lag behind
    /// rather than stall the connection.
    pub state_event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_host: DEFAULT_HOST.to_string(),
            fallback_hosts: Vec::new(),
            port: DEFAULT_TLS_PORT,
            tls: true,
            realtime_request_timeout: REALTIME_REQUEST_TIMEOUT,
            disconnected_retry_timeout: DISCONNECTED_RETRY_TIMEOUT,
            suspended_retry_timeout: SUSPENDED_RETRY_TIMEOUT,
            connection_state_ttl: CONNECTION_STATE_TTL,
            force_close_timeout: FORCE_CLOSE_TIMEOUT,
            retry_floor: RETRY_FLOOR,
            retry_ceiling: RETRY_CEILING,
            fallback_retry_timeout: FALLBACK_RETRY_TIMEOUT,
            auto_connect: true,
            queue_messages: true,
            recover: None,
            state_event_capacity: STATE_EVENT_CAPACITY,
        }
    }
}

impl ClientOptions {
    /// Start building options from the defaults.
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::new()
    }

    /// Check the options and normalize the fallback list (duplicates and the
    /// default host are removed).
    pub fn validate(mut self) -> Result<Self, ConnectionError> {
        if self.default_host.trim().is_empty() {
            return Err(ConnectionError::Config("default host is empty".into()));
        }

        let timeouts = [
            ("realtime request timeout", self.realtime_request_timeout),
            ("disconnected retry timeout", self.disconnected_retry_timeout),
            ("suspended retry timeout", self.suspended_retry_timeout),
            ("connection state ttl", self.connection_state_ttl),
            ("force close timeout", self.force_close_timeout),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConnectionError::Config(format!("{} must be non-zero", name)));
        }
        if self.retry_floor > self.retry_ceiling {
            return Err(ConnectionError::Config(format!(
                "retry floor {:?} exceeds retry ceiling {:?}",
                self.retry_floor, self.retry_ceiling
            )));
        }
        if self.state_event_capacity == 0 {
            return Err(ConnectionError::Config(
                "state event capacity must be non-zero".into(),
            ));
        }

        let mut fallbacks: Vec<String> = Vec::with_capacity(self.fallback_hosts.len());
        for host in self.fallback_hosts.drain(..) {
            if host.trim().is_empty() || host == self.default_host || fallbacks.contains(&host) {
                continue;
            }
            fallbacks.push(host);
        }
        self.fallback_hosts = fallbacks;
        Ok(self)
    }

    /// Timeouts for the state machine.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            realtime_request: self.realtime_request_timeout,
            disconnected_retry: self.disconnected_retry_timeout,
            suspended_retry: self.suspended_retry_timeout,
            force_close: self.force_close_timeout,
            retry_floor: self.retry_floor,
            retry_ceiling: self.retry_ceiling,
        }
    }
}

/// Builder for [`ClientOptions`].
#[derive(Debug, Default)]
pub struct ClientOptionsBuilder {
    options: ClientOptions,
}

impl ClientOptionsBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default host.
    pub fn default_host(mut self, host: impl Into<String>) -> Self {
        self.options.default_host = host.into();
        self
    }

    /// Set the fallback hosts.
    pub fn fallback_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.fallback_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Enable or disable TLS.
    pub fn tls(mut self, tls: bool) -> Self {
        self.options.tls = tls;
        self
    }

    /// Set the per-attempt timeout.
    pub fn realtime_request_timeout(mut self, timeout: Duration) -> Self {
        self.options.realtime_request_timeout = timeout;
        self
    }

    /// Set the backoff base while disconnected.
    pub fn disconnected_retry_timeout(mut self, timeout: Duration) -> Self {
        self.options.disconnected_retry_timeout = timeout;
        self
    }

    /// Set the retry interval while suspended.
    pub fn suspended_retry_timeout(mut self, timeout: Duration) -> Self {
        self.options.suspended_retry_timeout = timeout;
        self
    }

    /// Set the connection-state TTL.
    pub fn connection_state_ttl(mut self, ttl: Duration) -> Self {
        self.options.connection_state_ttl = ttl;
        self
    }

    /// Set the force-close timeout.
    pub fn force_close_timeout(mut self, timeout: Duration) -> Self {
        self.options.force_close_timeout = timeout;
        self
    }

    /// Set the backoff floor and ceiling.
    pub fn retry_bounds(mut self, floor: Duration, ceiling: Duration) -> Self {
        self.options.retry_floor = floor;
        self.options.retry_ceiling = ceiling;
        self
    }

    /// Set how long a successful fallback host stays preferred.
    pub fn fallback_retry_timeout(mut self, timeout: Duration) -> Self {
        self.options.fallback_retry_timeout = timeout;
        self
    }

    /// Connect on creation.
    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.options.auto_connect = auto_connect;
        self
    }

    /// Queue messages sent before the connection is established.
    pub fn queue_messages(mut self, queue: bool) -> Self {
        self.options.queue_messages = queue;
        self
    }

    /// Recover a previous client instance's session.
    pub fn recover(mut self, recovery_key: impl Into<String>) -> Self {
        self.options.recover = Some(recovery_key.into());
        self
    }

    /// Set the state-change broadcast capacity.
    pub fn state_event_capacity(mut self, capacity: usize) -> Self {
        self.options.state_event_capacity = capacity;
        self
    }

    /// Build the options.
    pub fn build(self) -> ClientOptions {
        self.options
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.default_host, "realtime.example.net");
        assert_eq!(options.port, 443);
        assert!(options.tls);
        assert_eq!(options.disconnected_retry_timeout, Duration::from_secs(15));
        assert_eq!(options.connection_state_ttl, Duration::from_secs(120));
        assert!(options.auto_connect);
        assert!(options.recover.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r#"{"defaultHost":"rt.test","fallbackHosts":["a.test"],"forceCloseTimeout":2500,"autoConnect":false}"#;
        let options: ClientOptions = serde_json::from_str(json).unwrap();

        assert_eq!(options.default_host, "rt.test");
        assert_eq!(options.fallback_hosts, vec!["a.test"]);
        assert_eq!(options.force_close_timeout, Duration::from_millis(2500));
        assert!(!options.auto_connect);
        assert_eq!(options.suspended_retry_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_serialize_millis() {
        let options = ClientOptions::builder()
            .realtime_request_timeout(Duration::from_secs(4))
            .build();
        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["realtimeRequestTimeout"], 4000);
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        let empty_host = ClientOptions::builder().default_host("  ").build();
        assert!(matches!(empty_host.validate(), Err(ConnectionError::Config(_))));

        let zero = ClientOptions::builder().force_close_timeout(Duration::ZERO).build();
        assert!(matches!(zero.validate(), Err(ConnectionError::Config(_))));

        let inverted = ClientOptions::builder()
            .retry_bounds(Duration::from_secs(10), Duration::from_secs(1))
            .build();
        assert!(matches!(inverted.validate(), Err(ConnectionError::Config(_))));
    }

    #[test]
    fn test_validate_normalizes_fallbacks() {
        let options = ClientOptions::builder()
            .default_host("main")
            .fallback_hosts(["a", "main", "b", "a", ""])
            .build()
            .validate()
            .unwrap();
        assert_eq!(options.fallback_hosts, vec!["a", "b"]);
    }
}
