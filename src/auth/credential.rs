//! Access credential handed to the transport on connect.

use std::time::SystemTime;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Access token used to authenticate a connection.
///
/// The token bytes are wiped when the credential is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    token: String,
    #[zeroize(skip)]
    expires_at: Option<SystemTime>,
}

impl Credential {
    /// Create a credential from a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// Set the expiry time reported by the issuer.
    pub fn with_expiry(mut self, expires_at: SystemTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Get the token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Get the expiry time, if known.
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// Check whether the credential is past its known expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| t <= SystemTime::now())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_debug_redacts_token() {
        let credential = Credential::new("secret-token");
        let debug = format!("{:?}", credential);

        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_expiry() {
        let past = SystemTime::now() - Duration::from_secs(5);
        let future = SystemTime::now() + Duration::from_secs(3600);

        assert!(!Credential::new("t").is_expired());
        assert!(Credential::new("t").with_expiry(past).is_expired());
        assert!(!Credential::new("t").with_expiry(future).is_expired());
    }

    #[test]
    fn test_zeroize_clears_token() {
        let mut credential = Credential::new("secret-token");
        credential.zeroize();
        assert!(credential.token().is_empty());
    }
}
