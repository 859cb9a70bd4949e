//! Bridge to the external credential subsystem.
//!
//! The connection manager calls [`AuthRenewal::renew`] at most once per run
//! of consecutive credential errors. The result feeds the next connection
//! attempt; a failure is surfaced with the bridge's own error so callers can
//! tell "could not reconnect" from "could not get a new credential".

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::Credential;
use crate::core::ErrorInfo;

/// Obtains a fresh credential from the credential subsystem.
#[async_trait]
pub trait AuthRenewal: Send + Sync {
    /// Request a new credential. May perform network I/O.
    async fn renew(&self) -> Result<Credential, ErrorInfo>;
}

#[async_trait]
impl<F, Fut> AuthRenewal for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Credential, ErrorInfo>> + Send + 'static,
{
    async fn renew(&self) -> Result<Credential, ErrorInfo> {
        (self)().await
    }
}

/// Authentication setup for a connection.
#[derive(Clone, Default)]
pub struct AuthOptions {
    /// Credential used for the first attempt.
    pub credential: Option<Credential>,
    /// Renewal bridge; without one, credential errors are terminal.
    pub renewal: Option<Arc<dyn AuthRenewal>>,
}

impl AuthOptions {
    /// No credential and no renewal.
    pub fn none() -> Self {
        Self::default()
    }

    /// A fixed credential that cannot be renewed.
    pub fn token(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
            renewal: None,
        }
    }

    /// A renewable credential. `initial` may be `None` to fetch lazily on the
    /// first credential error.
    pub fn renewable(initial: Option<Credential>, renewal: Arc<dyn AuthRenewal>) -> Self {
        Self {
            credential: initial,
            renewal: Some(renewal),
        }
    }

    /// Whether credential errors can be recovered by renewal.
    pub fn is_renewable(&self) -> bool {
        self.renewal.is_some()
    }
}

impl std::fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthOptions")
            .field("credential", &self.credential)
            .field("renewable", &self.is_renewable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_closure_bridge() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let bridge: Arc<dyn AuthRenewal> = Arc::new(move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(Credential::new(format!("token-{}", n)))
            }
        });

        assert_eq!(bridge.renew().await.unwrap().token(), "token-0");
        assert_eq!(bridge.renew().await.unwrap().token(), "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bridge_error_passes_through() {
        let bridge: Arc<dyn AuthRenewal> =
            Arc::new(|| async { Err(ErrorInfo::new(40170, 401, "issuer rejected request")) });

        let error = bridge.renew().await.unwrap_err();
        assert_eq!(error.code, 40170);
    }

    #[test]
    fn test_renewable_flag() {
        assert!(!AuthOptions::none().is_renewable());
        assert!(!AuthOptions::token(Credential::new("t")).is_renewable());

        let bridge: Arc<dyn AuthRenewal> = Arc::new(|| async { Ok(Credential::new("t")) });
        assert!(AuthOptions::renewable(None, bridge).is_renewable());
    }
}
