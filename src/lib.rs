//! # a3s-linkguard
//!
//! Phishing link interception and threat verification for webmail clients.
//!
//! ## Overview
//!
//! `a3s-linkguard` holds back link clicks inside a webmail document, asks a
//! threat-intelligence source about the destination, and either resumes the
//! navigation or puts a warning in front of it. The user is never left with a
//! dead click: when no verdict arrives in time, an advisory is shown instead.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_linkguard::{
//!     Anchor, ClickEvent, Dispatcher, DocumentContext, FrameId, GuardConfig, MemoryPage,
//!     MemoryThreatSource, Resolution, Sentinel, TabId,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_linkguard::Result<()> {
//! let config = GuardConfig::default();
//! let source = Arc::new(MemoryThreatSource::with_flagged(["http://evil-phish.example/reset"]));
//! let dispatcher = Dispatcher::start(&config, source)?;
//!
//! let mut page = MemoryPage::new();
//! let link = page.add_anchor(Anchor::new("http://evil-phish.example/reset"));
//! let document = DocumentContext::new(TabId(1), FrameId(0), "https://mail.google.com/mail/u/0/")?;
//! let mut sentinel = Sentinel::attach(document, page, dispatcher.handle(), &config)?;
//!
//! sentinel.intercept(ClickEvent::on(link)).await;
//! if let Some(Resolution::Blocked { overlay_id, .. }) = sentinel.next_resolution().await {
//!     sentinel.cancel(overlay_id);
//! }
//!
//! dispatcher.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Threat sources
//!
//! - **http**: remote lookup service over reqwest, optionally sending only a
//!   SHA-256 digest of the URL
//! - **memory**: scripted in-process source for tests and offline use
//!
//! ## Architecture
//!
//! - **Sentinel**: per-document click interception and overlays
//! - **Dispatcher**: shared actor deduplicating in-flight checks
//! - **Verifier**: cache lookup, bounded query, fallback policy
//! - **VerdictCache**: LRU with TTLs and in-flight pins
//! - **ThreatSource** trait: core abstraction all backends implement

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod normalize;
pub mod platform;
pub mod sentinel;
pub mod source;
pub mod types;
pub mod verifier;

// Re-export core types
pub use cache::VerdictCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::{GuardError, Result};
pub use normalize::{classify_href, normalize, ExemptReason, LinkTarget, NormalizedUrl};
pub use platform::WebmailPlatform;
pub use sentinel::{
    Anchor, ClickEvent, ClickModifiers, DocumentContext, InterceptOutcome, MemoryPage,
    Navigation, NavigationTarget, Overlay, OverlayAction, OverlayId, OverlayKind, Page,
    Resolution, Sentinel,
};
pub use source::{ThreatLookup, ThreatSource};
pub use types::{
    CandidateLink, Classification, CorrelationId, ElementHandle, FrameId, TabId, Verdict,
    VerdictRequest, VerdictResponse, VerdictSource, VerdictStats,
};
pub use verifier::Verifier;

// Re-export sources for convenience
pub use source::http::{url_digest, HttpThreatSource};
pub use source::memory::{FailureMode, MemoryThreatSource};
