//! Fallback host selection.
//!
//! The fallback list is shuffled once when the selector is created. The
//! default host is used for the first attempt and after every reset; a
//! transient failure moves through the unused fallbacks in order, and once
//! they are exhausted the default host is tried again and the rotation
//! starts over.

use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use tokio::time::Instant;

/// Chooses the host for each connection attempt.
#[derive(Debug, Clone)]
pub struct FallbackHosts {
    default_host: String,
    fallbacks: Vec<String>,
    next: usize,
    current: Option<String>,
    preferred: Option<(String, Instant)>,
}

impl FallbackHosts {
    /// Create a selector, shuffling `fallbacks` with the thread RNG.
    pub fn new(default_host: impl Into<String>, fallbacks: Vec<String>) -> Self {
        Self::with_rng(default_host, fallbacks, &mut rand::thread_rng())
    }

    /// Create a selector, shuffling `fallbacks` with `rng`.
    pub fn with_rng<R: Rng + ?Sized>(
        default_host: impl Into<String>,
        fallbacks: Vec<String>,
        rng: &mut R,
    ) -> Self {
        let default_host = default_host.into();
        let mut unique: Vec<String> = Vec::with_capacity(fallbacks.len());
        for host in fallbacks {
            if host != default_host && !unique.contains(&host) {
                unique.push(host);
            }
        }
        let mut fallbacks = unique;
        fallbacks.shuffle(rng);
        Self {
            default_host,
            fallbacks,
            next: 0,
            current: None,
            preferred: None,
        }
    }

    /// The default host.
    pub fn default_host(&self) -> &str {
        &self.default_host
    }

    /// Fallback hosts in the order they will be tried.
    pub fn fallbacks(&self) -> &[String] {
        &self.fallbacks
    }

    /// Host of the most recent attempt.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Whether `host` is one of the fallback hosts.
    pub fn is_fallback(&self, host: &str) -> bool {
        self.fallbacks.iter().any(|fallback| fallback == host)
    }

    /// Whether a fallback host remains untried in this rotation.
    pub fn has_unused_fallback(&self) -> bool {
        self.next < self.fallbacks.len()
    }

    /// Choose the host for the next attempt.
    ///
    /// Without `use_fallback` the default host is returned. With it, the next
    /// unused fallback is returned; when none remain the default host is
    /// returned and the rotation starts over.
    pub fn next_host(&mut self, use_fallback: bool) -> String {
        let host = if use_fallback && self.has_unused_fallback() {
            let host = self.fallbacks[self.next].clone();
            self.next += 1;
            host
        } else {
            if use_fallback {
                self.next = 0;
            }
            self.default_host.clone()
        };
        self.current = Some(host.clone());
        host
    }

    /// Restart the rotation so the next attempt uses the default host first.
    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Record a successful connection at `now`. A fallback host stays
    /// preferred for `keep_for`.
    pub fn on_connected(&mut self, now: Instant, keep_for: Duration) {
        self.preferred = match &self.current {
            Some(host) if self.is_fallback(host) => Some((host.clone(), now + keep_for)),
            _ => None,
        };
    }

    /// Preferred host for non-realtime requests, if a fallback is in use and
    /// its preference has not expired.
    pub fn preferred(&self, now: Instant) -> Option<(&str, Instant)> {
        self.preferred
            .as_ref()
            .filter(|(_, until)| now < *until)
            .map(|(host, until)| (host.as_str(), *until))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> FallbackHosts {
        FallbackHosts::new(
            "main.example.net",
            vec!["a.example.net".into(), "b.example.net".into(), "c.example.net".into()],
        )
    }

    #[test]
    fn test_first_attempt_uses_default() {
        let mut hosts = hosts();
        assert_eq!(hosts.next_host(false), "main.example.net");
        assert_eq!(hosts.current(), Some("main.example.net"));
    }

    #[test]
    fn test_rotation_then_default() {
        let mut hosts = hosts();
        hosts.next_host(false);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let host = hosts.next_host(true);
            assert_ne!(host, "main.example.net");
            assert!(!seen.contains(&host));
            seen.push(host);
        }
        assert!(!hosts.has_unused_fallback());

        // Exhausted: back to the default, then around again.
        assert_eq!(hosts.next_host(true), "main.example.net");
        assert!(hosts.has_unused_fallback());
        assert_eq!(hosts.next_host(true), seen[0]);
    }

    #[test]
    fn test_reset_returns_to_default_order() {
        let mut hosts = hosts();
        let first = hosts.next_host(true);
        hosts.next_host(true);

        hosts.reset();
        assert_eq!(hosts.next_host(false), "main.example.net");
        assert_eq!(hosts.next_host(true), first);
    }

    #[test]
    fn test_default_removed_from_fallbacks() {
        let hosts = FallbackHosts::new("x", vec!["x".into(), "y".into()]);
        assert_eq!(hosts.fallbacks(), ["y".to_string()]);
    }

    #[test]
    fn test_no_fallbacks() {
        let mut hosts = FallbackHosts::new("x", Vec::new());
        assert!(!hosts.has_unused_fallback());
        assert_eq!(hosts.next_host(true), "x");
    }

    #[test]
    fn test_preferred_fallback_expires() {
        let now = Instant::now();
        let keep = Duration::from_secs(600);
        let mut hosts = hosts();

        hosts.next_host(false);
        hosts.on_connected(now, keep);
        assert!(hosts.preferred(now).is_none());

        let fallback = hosts.next_host(true);
        hosts.on_connected(now, keep);
        assert_eq!(hosts.preferred(now).map(|(host, _)| host), Some(fallback.as_str()));
        assert!(hosts.preferred(now + keep).is_none());
    }
}
