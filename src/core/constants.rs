//! Protocol constants for the realtime connection layer.
//!
//! Timeouts here are the defaults used by [`ClientOptions`]; error codes are
//! the values the service and this client put in [`ErrorInfo::code`].
//!
//! [`ClientOptions`]: crate::connection::ClientOptions
//! [`ErrorInfo::code`]: crate::core::ErrorInfo

use std::time::Duration;

// =============================================================================
// PROTOCOL
// =============================================================================

/// Protocol version sent as the `v` connection parameter.
pub const PROTOCOL_VERSION: &str = "2";

/// Library identifier sent as the `agent` connection parameter.
pub const AGENT: &str = concat!("realtime-connection-rust/", env!("CARGO_PKG_VERSION"));

/// Default realtime endpoint.
pub const DEFAULT_HOST: &str = "realtime.example.net";

/// Default TLS port.
pub const DEFAULT_TLS_PORT: u16 = 443;

// =============================================================================
// TIMING
// =============================================================================

/// Upper bound on a single connection attempt before it is forced to
/// `Disconnected`.
pub const REALTIME_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Base delay for incremental retries while `Disconnected`.
pub const DISCONNECTED_RETRY_TIMEOUT: Duration = Duration::from_secs(15);

/// Fixed retry interval while `Suspended`.
pub const SUSPENDED_RETRY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a reconnection episode may keep retrying before escalating to
/// `Suspended`.
pub const CONNECTION_STATE_TTL: Duration = Duration::from_secs(120);

/// Time allowed for the server to confirm a close before `Closed` is forced.
pub const FORCE_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lower clamp for a computed retry delay.
pub const RETRY_FLOOR: Duration = Duration::from_secs(1);

/// Upper clamp for a computed retry delay.
pub const RETRY_CEILING: Duration = Duration::from_secs(60);

/// How long a fallback host that connected successfully stays preferred for
/// non-realtime requests.
pub const FALLBACK_RETRY_TIMEOUT: Duration = Duration::from_secs(600);

/// Maximum backoff multiplier applied to the disconnected retry timeout.
pub const MAX_BACKOFF_COEFFICIENT: f64 = 2.0;

/// Jitter applied to incremental retry delays (fraction, both directions).
pub const RETRY_JITTER: f64 = 0.2;

/// Capacity of the state-change broadcast channel.
pub const STATE_EVENT_CAPACITY: usize = 64;

// =============================================================================
// ERROR CODES
// =============================================================================

/// First code of the credential-expiry range (inclusive).
pub const TOKEN_ERROR_RANGE_START: u32 = 40140;

/// End of the credential-expiry range (exclusive).
pub const TOKEN_ERROR_RANGE_END: u32 = 40150;

/// Access token expired.
pub const TOKEN_EXPIRED: u32 = 40142;

/// Generic internal error.
pub const INTERNAL_ERROR: u32 = 50000;

/// Connection failed.
pub const CONNECTION_FAILED: u32 = 80000;

/// Connection suspended after the connection-state TTL elapsed.
pub const CONNECTION_SUSPENDED: u32 = 80002;

/// Connection lost; a reconnection will be attempted.
pub const DISCONNECTED: u32 = 80003;

/// Previous session could not be resumed or recovered.
pub const UNABLE_TO_RECOVER: u32 = 80008;

/// A connection attempt exceeded the realtime request timeout.
pub const CONNECTION_TIMED_OUT: u32 = 80014;

/// Connection closed by the client.
pub const CONNECTION_CLOSED: u32 = 80017;

/// The credential renewal bridge failed.
pub const AUTH_RENEWAL_FAILED: u32 = 80019;

/// A message was never acknowledged by the server.
pub const MESSAGE_NOT_ACKNOWLEDGED: u32 = 80021;
