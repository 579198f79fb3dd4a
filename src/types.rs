//! Core verdict types for the link verification pipeline
//!
//! `VerdictRequest` and `Verdict` are the only shapes that cross the boundary
//! between page-embedded sentinels and the privileged dispatcher. Both use
//! camelCase JSON serialization for wire compatibility.

use crate::error::GuardError;
use crate::normalize::NormalizedUrl;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Correlates a sentinel's request with the dispatcher's response (lnk-<uuid>)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh correlation id
    pub fn new() -> Self {
        Self(format!("lnk-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Browser tab identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

/// Frame identifier within a tab (0 = top-level document)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub u32);

/// Opaque, page-local handle to a DOM element
///
/// Valid only within the document that issued it. Holding a handle never
/// keeps the element alive; a handle the page no longer resolves means the
/// target is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(pub u64);

/// Threat classification of a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Safe,
    Malicious,
    /// Only ever produced by the fallback path
    Unknown,
}

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictSource {
    /// Served from the verdict cache
    Cache,
    /// Fresh answer from the threat source
    Live,
    /// Threat source could not be consulted in time
    Fallback,
}

/// Classification result for a URL with provenance and expiry
///
/// Invariants enforced by every constructor and by deserialization:
/// `expires_at > obtained_at`, and `Unknown` only ever carries `Fallback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawVerdict")]
pub struct Verdict {
    normalized_url: NormalizedUrl,
    classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    source: VerdictSource,
    /// Unix milliseconds
    obtained_at: u64,
    /// Unix milliseconds
    expires_at: u64,
    /// Why the fallback path was taken (fallback verdicts only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl Verdict {
    /// A definitive answer from the threat source
    ///
    /// `classification` must be `Safe` or `Malicious`; an `Unknown` here is
    /// downgraded to a fallback verdict so the invariant cannot be broken.
    pub fn live(
        normalized_url: NormalizedUrl,
        classification: Classification,
        confidence: Option<f64>,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Self {
        if classification == Classification::Unknown {
            return Self::fallback(normalized_url, now_ms, ttl_ms, "unknown classification");
        }
        Self {
            normalized_url,
            classification,
            confidence: clamp_confidence(confidence),
            source: VerdictSource::Live,
            obtained_at: now_ms,
            expires_at: expiry(now_ms, ttl_ms),
            reason: None,
        }
    }

    /// An `Unknown` verdict issued when the threat source could not be consulted
    pub fn fallback(
        normalized_url: NormalizedUrl,
        now_ms: u64,
        ttl_ms: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            normalized_url,
            classification: Classification::Unknown,
            confidence: None,
            source: VerdictSource::Fallback,
            obtained_at: now_ms,
            expires_at: expiry(now_ms, ttl_ms),
            reason: Some(reason.into()),
        }
    }

    /// Copy of this verdict as served from the cache
    ///
    /// Fallback verdicts keep their `Fallback` source.
    pub fn as_cached(&self) -> Self {
        let mut cached = self.clone();
        if cached.source == VerdictSource::Live {
            cached.source = VerdictSource::Cache;
        }
        cached
    }

    pub fn normalized_url(&self) -> &NormalizedUrl {
        &self.normalized_url
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn source(&self) -> VerdictSource {
        self.source
    }

    pub fn obtained_at(&self) -> u64 {
        self.obtained_at
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Remaining lifetime in milliseconds
    pub fn ttl_ms(&self) -> u64 {
        self.expires_at - self.obtained_at
    }

    /// Whether the verdict is still valid at `now_ms`
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.expires_at > now_ms
    }

    pub fn is_safe(&self) -> bool {
        self.classification == Classification::Safe
    }

    pub fn is_malicious(&self) -> bool {
        self.classification == Classification::Malicious
    }
}

fn expiry(now_ms: u64, ttl_ms: u64) -> u64 {
    now_ms.saturating_add(ttl_ms.max(1))
}

fn clamp_confidence(confidence: Option<f64>) -> Option<f64> {
    confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
}

/// Unvalidated wire form of `Verdict`
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    normalized_url: NormalizedUrl,
    classification: Classification,
    #[serde(default)]
    confidence: Option<f64>,
    source: VerdictSource,
    obtained_at: u64,
    expires_at: u64,
    #[serde(default)]
    reason: Option<String>,
}

impl TryFrom<RawVerdict> for Verdict {
    type Error = GuardError;

    fn try_from(raw: RawVerdict) -> Result<Self, Self::Error> {
        if raw.expires_at <= raw.obtained_at {
            return Err(GuardError::MalformedResponse(format!(
                "verdict for {} expires before it was obtained",
                raw.normalized_url
            )));
        }
        if raw.classification == Classification::Unknown
            && raw.source != VerdictSource::Fallback
        {
            return Err(GuardError::MalformedResponse(format!(
                "verdict for {} is UNKNOWN but not a fallback",
                raw.normalized_url
            )));
        }
        Ok(Self {
            normalized_url: raw.normalized_url,
            classification: raw.classification,
            confidence: clamp_confidence(raw.confidence),
            source: raw.source,
            obtained_at: raw.obtained_at,
            expires_at: raw.expires_at,
            reason: raw.reason,
        })
    }
}

/// Message sent from a sentinel to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRequest {
    pub correlation_id: CorrelationId,
    pub normalized_url: NormalizedUrl,
    pub tab_id: TabId,
}

impl VerdictRequest {
    pub fn new(normalized_url: NormalizedUrl, tab_id: TabId) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            normalized_url,
            tab_id,
        }
    }
}

/// Dispatcher's answer to a `VerdictRequest`
///
/// Every waiter on the same in-flight check receives the same `Arc`.
#[derive(Debug, Clone)]
pub struct VerdictResponse {
    pub correlation_id: CorrelationId,
    pub verdict: Arc<Verdict>,
}

/// A link click held back by a sentinel while its verdict is pending
#[derive(Debug, Clone)]
pub struct CandidateLink {
    pub correlation_id: CorrelationId,
    /// The href exactly as it appeared on the anchor
    pub raw_url: String,
    pub tab_id: TabId,
    pub frame_id: FrameId,
    pub element: ElementHandle,
    /// Unix milliseconds
    pub timestamp: u64,
}

/// Aggregate, non-sensitive verdict statistics
///
/// The only data the presentation layer may read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictStats {
    /// Safe verdicts delivered to requesters
    pub safe: u64,
    /// Malicious verdicts delivered to requesters
    pub malicious: u64,
    /// Unknown (fallback) verdicts delivered to requesters
    pub unknown: u64,
    /// Requests answered straight from the cache
    pub cache_hits: u64,
    /// External queries that produced a live verdict
    pub live_queries: u64,
    /// External queries that ended in a fallback verdict
    pub fallbacks: u64,
    /// Requests that joined an existing in-flight check
    pub deduplicated: u64,
}

impl VerdictStats {
    /// Total verdicts delivered
    pub fn total(&self) -> u64 {
        self.safe + self.malicious + self.unknown
    }

    pub(crate) fn record_delivery(&mut self, classification: Classification) {
        match classification {
            Classification::Safe => self.safe += 1,
            Classification::Malicious => self.malicious += 1,
            Classification::Unknown => self.unknown += 1,
        }
    }
}
