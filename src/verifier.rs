//! Verifier: cache lookup, bounded external query and fallback policy
//!
//! The verifier is the only component that talks to the threat source. Every
//! path through [`Verifier::resolve`] ends in a verdict: definitive answers
//! become SAFE/MALICIOUS, anything else becomes UNKNOWN/FALLBACK with a short
//! TTL so the outage is retried soon.

use crate::cache::VerdictCache;
use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::normalize::NormalizedUrl;
use crate::source::{ThreatLookup, ThreatSource};
use crate::types::{Classification, Verdict};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Timing and retry knobs taken from [`GuardConfig`]
#[derive(Debug, Clone, Copy)]
struct QueryPolicy {
    query_timeout: Duration,
    safe_ttl_ms: u64,
    malware_ttl_ms: u64,
    fallback_ttl_ms: u64,
    retry_on_connection_failure: bool,
}

impl From<&GuardConfig> for QueryPolicy {
    fn from(config: &GuardConfig) -> Self {
        Self {
            query_timeout: config.query_timeout(),
            safe_ttl_ms: config.safe_ttl_ms,
            malware_ttl_ms: config.malware_ttl_ms,
            fallback_ttl_ms: config.fallback_ttl_ms,
            retry_on_connection_failure: config.retry_on_connection_failure,
        }
    }
}

/// Resolves normalized URLs to verdicts
///
/// Cheap to clone; clones share the cache and the threat source.
#[derive(Clone)]
pub struct Verifier {
    source: Arc<dyn ThreatSource>,
    cache: Arc<Mutex<VerdictCache>>,
    policy: QueryPolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("source", &self.source.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Verifier {
    /// Create a verifier on the system clock
    pub fn new(source: Arc<dyn ThreatSource>, config: &GuardConfig) -> Self {
        Self::with_clock(source, config, Arc::new(SystemClock))
    }

    /// Create a verifier with an injected clock
    pub fn with_clock(
        source: Arc<dyn ThreatSource>,
        config: &GuardConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            cache: Arc::new(Mutex::new(VerdictCache::new(
                config.cache_capacity,
                clock.clone(),
            ))),
            policy: QueryPolicy::from(config),
            clock,
        }
    }

    /// Resolve a URL: fresh cache entry first, otherwise one bounded query
    pub async fn resolve(&self, url: &NormalizedUrl) -> Verdict {
        if let Some(cached) = self.cached(url) {
            return cached;
        }
        let verdict = self.query(url).await;
        self.record(&verdict);
        verdict
    }

    /// Fresh cached verdict, tagged as served from the cache
    pub fn cached(&self, url: &NormalizedUrl) -> Option<Verdict> {
        let verdict = self.lock_cache().get(url)?.as_cached();
        tracing::debug!(
            url = %url,
            classification = ?verdict.classification(),
            "Verdict cache hit"
        );
        Some(verdict)
    }

    /// Query the threat source without touching the cache
    ///
    /// The whole call, retry included, shares one deadline of
    /// `queryTimeoutMs`. Never fails: errors become a fallback verdict.
    pub async fn query(&self, url: &NormalizedUrl) -> Verdict {
        let deadline = Instant::now() + self.policy.query_timeout;

        let mut result = self.attempt(url, deadline).await;
        let retry = self.policy.retry_on_connection_failure
            && matches!(&result, Err(e) if e.is_connection_failure())
            && Instant::now() < deadline;
        if retry {
            tracing::debug!(url = %url, "Connection failed, retrying threat lookup once");
            result = self.attempt(url, deadline).await;
        }

        let now = self.clock.now_ms();
        match result {
            Ok(ThreatLookup::Match { confidence }) => {
                tracing::info!(url = %url, source = self.source.name(), "Malicious link verdict");
                Verdict::live(
                    url.clone(),
                    Classification::Malicious,
                    confidence,
                    now,
                    self.policy.malware_ttl_ms,
                )
            }
            Ok(ThreatLookup::NoMatch { confidence }) => {
                tracing::debug!(url = %url, source = self.source.name(), "Safe link verdict");
                Verdict::live(
                    url.clone(),
                    Classification::Safe,
                    confidence,
                    now,
                    self.policy.safe_ttl_ms,
                )
            }
            Err(e) => {
                tracing::warn!(
                    url = %url,
                    source = self.source.name(),
                    error = %e,
                    "Threat source unusable, issuing fallback verdict"
                );
                self.fallback(url, e.kind())
            }
        }
    }

    /// Store a verdict produced by [`query`](Self::query)
    pub fn record(&self, verdict: &Verdict) {
        self.lock_cache()
            .put(verdict.normalized_url().clone(), verdict.clone());
    }

    /// Build a fallback verdict with the configured short TTL
    pub fn fallback(&self, url: &NormalizedUrl, reason: &str) -> Verdict {
        Verdict::fallback(
            url.clone(),
            self.clock.now_ms(),
            self.policy.fallback_ttl_ms,
            reason,
        )
    }

    /// Protect a URL's cache entry while a check is in flight
    pub fn pin(&self, url: &NormalizedUrl) {
        self.lock_cache().pin(url);
    }

    pub fn unpin(&self, url: &NormalizedUrl) {
        self.lock_cache().unpin(url);
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.lock_cache().len()
    }

    /// Whether any entry, fresh or expired, is cached for `url`
    pub fn contains(&self, url: &NormalizedUrl) -> bool {
        self.lock_cache().contains(url)
    }

    pub fn is_pinned(&self, url: &NormalizedUrl) -> bool {
        self.lock_cache().is_pinned(url)
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    async fn attempt(&self, url: &NormalizedUrl, deadline: Instant) -> Result<ThreatLookup> {
        match tokio::time::timeout_at(deadline, self.source.lookup(url)).await {
            Ok(result) => result,
            Err(_) => Err(GuardError::Timeout(format!(
                "no answer from {} within {}ms",
                self.source.name(),
                self.policy.query_timeout.as_millis()
            ))),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, VerdictCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
