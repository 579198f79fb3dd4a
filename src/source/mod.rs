//! Threat source trait: the core abstraction for threat-intelligence backends
//!
//! The verifier talks to exactly one `ThreatSource`. Backends only answer
//! "listed or not"; timeouts, retries and fallback policy live in the
//! verifier.

use crate::error::Result;
use crate::normalize::NormalizedUrl;
use async_trait::async_trait;

pub mod http;
pub mod memory;

pub use http::HttpThreatSource;
pub use memory::{FailureMode, MemoryThreatSource};

/// Definitive answer from a threat source
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThreatLookup {
    /// The URL is on the threat list
    Match { confidence: Option<f64> },
    /// The URL is known safe or simply unlisted
    NoMatch { confidence: Option<f64> },
}

impl ThreatLookup {
    pub fn is_match(&self) -> bool {
        matches!(self, ThreatLookup::Match { .. })
    }

    pub fn confidence(&self) -> Option<f64> {
        match self {
            ThreatLookup::Match { confidence } | ThreatLookup::NoMatch { confidence } => {
                *confidence
            }
        }
    }
}

/// Core trait for threat-intelligence backends
///
/// Errors map onto the fallback path: `GuardError::Connection` is the only
/// kind the verifier retries.
#[async_trait]
pub trait ThreatSource: Send + Sync {
    /// Look up a single normalized URL
    async fn lookup(&self, url: &NormalizedUrl) -> Result<ThreatLookup>;

    /// Source name (e.g., "http", "memory")
    fn name(&self) -> &str;
}
