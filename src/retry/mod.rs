//! Reconnection policy: backoff schedule and fallback host selection.

mod backoff;
mod fallback;

pub use backoff::{RetryState, backoff_coefficient, jitter_coefficient, retry_delay};
pub use fallback::FallbackHosts;
