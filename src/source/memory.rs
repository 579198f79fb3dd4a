//! In-memory threat source for tests, demos and offline use
//!
//! Holds a set of flagged URLs and can be scripted to misbehave: add latency,
//! fail the next N lookups, or fail every lookup until cleared.

use super::{ThreatLookup, ThreatSource};
use crate::error::{GuardError, Result};
use crate::normalize::{normalize, NormalizedUrl};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How a scripted lookup fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Connection refused (retryable)
    ConnectionRefused,
    /// Never answers; the verifier's deadline fires
    Hang,
    /// Non-success HTTP status
    Unavailable(u16),
    /// HTTP 429
    RateLimited,
    /// Answer that cannot be parsed
    Malformed,
}

impl FailureMode {
    fn into_error(self) -> GuardError {
        match self {
            FailureMode::ConnectionRefused => {
                GuardError::Connection("connection refused".to_string())
            }
            FailureMode::Hang => GuardError::Timeout("scripted hang".to_string()),
            FailureMode::Unavailable(status) => GuardError::Unavailable { status },
            FailureMode::RateLimited => GuardError::RateLimited {
                retry_after_secs: None,
            },
            FailureMode::Malformed => {
                GuardError::MalformedResponse("scripted malformed body".to_string())
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    flagged: HashMap<String, Option<f64>>,
    next_failures: VecDeque<FailureMode>,
    persistent_failure: Option<FailureMode>,
    latency: Duration,
}

/// Scripted threat source
#[derive(Debug, Default)]
pub struct MemoryThreatSource {
    state: Mutex<MemoryState>,
    queries: AtomicUsize,
    per_url: Mutex<HashMap<String, usize>>,
}

impl MemoryThreatSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source with the given URLs already flagged
    pub fn with_flagged<'a>(urls: impl IntoIterator<Item = &'a str>) -> Self {
        let source = Self::new();
        for url in urls {
            source.flag(url);
        }
        source
    }

    /// Flag a URL as malicious (normalized before storing)
    pub fn flag(&self, url: &str) {
        self.flag_with_confidence(url, None);
    }

    pub fn flag_with_confidence(&self, url: &str, confidence: Option<f64>) {
        let key = key_for(url);
        self.with_state(|s| {
            s.flagged.insert(key, confidence);
        });
    }

    /// Remove a URL from the threat list
    pub fn unflag(&self, url: &str) {
        let key = key_for(url);
        self.with_state(|s| {
            s.flagged.remove(&key);
        });
    }

    /// Delay every lookup by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.with_state(|s| s.latency = latency);
    }

    /// Fail the next `count` lookups with `mode`, then behave normally
    pub fn fail_next(&self, count: usize, mode: FailureMode) {
        self.with_state(|s| s.next_failures.extend(std::iter::repeat(mode).take(count)));
    }

    /// Fail every lookup with `mode` until cleared with `None`
    pub fn set_failure(&self, mode: Option<FailureMode>) {
        self.with_state(|s| s.persistent_failure = mode);
    }

    /// Total lookups received
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Lookups received for one URL
    pub fn queries_for(&self, url: &str) -> usize {
        let key = key_for(url);
        self.per_url
            .lock()
            .map(|m| m.get(&key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Flagged URLs, sorted
    pub fn flagged(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.with_state(|s| s.flagged.keys().cloned().collect());
        urls.sort();
        urls
    }

    /// Whether any failure is still scripted
    pub fn has_scripted_failures(&self) -> bool {
        self.with_state(|s| !s.next_failures.is_empty() || s.persistent_failure.is_some())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut state)
    }
}

fn key_for(url: &str) -> String {
    normalize(url, None)
        .map(NormalizedUrl::into_string)
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl ThreatSource for MemoryThreatSource {
    async fn lookup(&self, url: &NormalizedUrl) -> Result<ThreatLookup> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut per_url) = self.per_url.lock() {
            *per_url.entry(url.as_str().to_string()).or_insert(0) += 1;
        }

        let (latency, failure) = self.with_state(|s| {
            let failure = s.next_failures.pop_front().or(s.persistent_failure);
            (s.latency, failure)
        });

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match failure {
            Some(FailureMode::Hang) => {
                futures::future::pending::<()>().await;
                Err(FailureMode::Hang.into_error())
            }
            Some(mode) => Err(mode.into_error()),
            None => {
                let flagged = self.with_state(|s| s.flagged.get(url.as_str()).copied());
                Ok(match flagged {
                    Some(confidence) => ThreatLookup::Match { confidence },
                    None => ThreatLookup::NoMatch { confidence: None },
                })
            }
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> NormalizedUrl {
        normalize(raw, None).unwrap()
    }

    #[tokio::test]
    async fn test_flagged_url_matches() {
        let source = MemoryThreatSource::with_flagged(["HTTP://Evil-Phish.example/reset"]);
        let result = source.lookup(&url("http://evil-phish.example/reset")).await.unwrap();
        assert!(result.is_match());

        let result = source.lookup(&url("https://safe-bank.example/login")).await.unwrap();
        assert!(!result.is_match());
        assert_eq!(source.query_count(), 2);
        assert_eq!(source.queries_for("http://evil-phish.example/reset"), 1);
    }

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let source = MemoryThreatSource::new();
        source.fail_next(1, FailureMode::Unavailable(503));

        let err = source.lookup(&url("https://a.example/")).await.unwrap_err();
        assert!(matches!(err, GuardError::Unavailable { status: 503 }));
        assert!(!source.has_scripted_failures());
        assert!(source.lookup(&url("https://a.example/")).await.is_ok());
    }

    #[tokio::test]
    async fn test_persistent_failure() {
        let source = MemoryThreatSource::new();
        source.set_failure(Some(FailureMode::ConnectionRefused));
        for _ in 0..3 {
            let err = source.lookup(&url("https://a.example/")).await.unwrap_err();
            assert!(err.is_connection_failure());
        }
        source.set_failure(None);
        assert!(source.lookup(&url("https://a.example/")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_never_resolves() {
        let source = MemoryThreatSource::new();
        source.set_failure(Some(FailureMode::Hang));
        let result = tokio::time::timeout(
            Duration::from_secs(60),
            source.lookup(&url("https://a.example/")),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_flag_and_unflag() {
        let source = MemoryThreatSource::with_flagged(["https://b.example/", "https://a.example"]);
        assert_eq!(source.flagged(), vec!["https://a.example/", "https://b.example/"]);

        source.unflag("https://a.example");
        assert_eq!(source.flagged(), vec!["https://b.example/"]);
    }
}
