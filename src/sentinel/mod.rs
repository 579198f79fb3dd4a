//! Sentinel: per-document click interception
//!
//! A sentinel is attached to one webmail document. Qualifying link clicks are
//! held back while the dispatcher produces a verdict:
//!
//! - SAFE resumes the navigation with the target captured from the click
//! - MALICIOUS shows a blocking overlay (proceed anyway / cancel)
//! - UNKNOWN, or no verdict within the interception window, shows an
//!   advisory overlay that defaults to proceeding
//!
//! Script links, intra-page anchors, non-web schemes and malformed hrefs are
//! exempt and navigate normally. A held navigation is never silently lost.

mod page;

pub use page::{
    Anchor, MemoryPage, Navigation, NavigationTarget, Overlay, OverlayAction, OverlayId,
    OverlayKind, Page,
};

use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::dispatcher::DispatcherHandle;
use crate::error::{GuardError, Result};
use crate::normalize::{classify_href, ExemptReason, LinkTarget, NormalizedUrl};
use crate::platform::WebmailPlatform;
use crate::types::{
    CandidateLink, Classification, CorrelationId, ElementHandle, FrameId, TabId, Verdict,
    VerdictRequest, VerdictResponse,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

/// Identity of the document a sentinel guards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContext {
    pub tab_id: TabId,
    pub frame_id: FrameId,
    pub url: Url,
    /// `<base href>` when the document declares one
    pub base: Option<Url>,
}

impl DocumentContext {
    pub fn new(tab_id: TabId, frame_id: FrameId, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| GuardError::MalformedUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            tab_id,
            frame_id,
            url,
            base: None,
        })
    }

    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    /// URL relative hrefs resolve against
    pub fn base_url(&self) -> &Url {
        self.base.as_ref().unwrap_or(&self.url)
    }
}

/// Modifier state captured with a click
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickModifiers {
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
    pub middle_button: bool,
}

/// A click on a page element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickEvent {
    pub element: ElementHandle,
    pub modifiers: ClickModifiers,
}

impl ClickEvent {
    /// Plain primary-button click
    pub fn on(element: ElementHandle) -> Self {
        Self {
            element,
            modifiers: ClickModifiers::default(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: ClickModifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// What [`Sentinel::intercept`] did with a click
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptOutcome {
    /// Not on a link (or the element is gone); default behavior applies
    NotALink,
    /// Allowed locally without a remote check; default navigation applies
    Exempt(ExemptReason),
    /// The element already has a held navigation; click ignored
    Duplicate(CorrelationId),
    /// Navigation held while a verdict is requested
    Pending(CorrelationId),
}

impl InterceptOutcome {
    /// Whether the page's default navigation must be prevented
    pub fn suppresses_navigation(&self) -> bool {
        matches!(
            self,
            InterceptOutcome::Duplicate(_) | InterceptOutcome::Pending(_)
        )
    }
}

/// How a held navigation was settled by a verdict
#[derive(Debug, Clone)]
pub enum Resolution {
    /// SAFE: navigation resumed
    Navigated {
        correlation_id: CorrelationId,
        url: String,
        target: NavigationTarget,
        verdict: Arc<Verdict>,
    },
    /// MALICIOUS: blocking overlay shown
    Blocked {
        correlation_id: CorrelationId,
        overlay_id: OverlayId,
        verdict: Arc<Verdict>,
    },
    /// UNKNOWN: advisory overlay shown
    Advised {
        correlation_id: CorrelationId,
        overlay_id: OverlayId,
        verdict: Arc<Verdict>,
        /// No verdict arrived within the interception window
        timed_out: bool,
    },
    /// The clicked element disappeared before the verdict; nothing to resume
    TargetGone { correlation_id: CorrelationId },
}

impl Resolution {
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Resolution::Navigated { correlation_id, .. }
            | Resolution::Blocked { correlation_id, .. }
            | Resolution::Advised { correlation_id, .. }
            | Resolution::TargetGone { correlation_id } => correlation_id,
        }
    }

    pub fn overlay_id(&self) -> Option<OverlayId> {
        match self {
            Resolution::Blocked { overlay_id, .. } | Resolution::Advised { overlay_id, .. } => {
                Some(*overlay_id)
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
enum HoldState {
    AwaitingVerdict { deadline: Instant },
    Overlay { default_action: OverlayAction },
}

#[derive(Debug)]
struct HeldLink {
    candidate: CandidateLink,
    normalized: NormalizedUrl,
    /// Absolute URL to resume, query and fragment intact
    navigate_to: String,
    target: NavigationTarget,
    state: HoldState,
}

/// Click interceptor for one document
pub struct Sentinel<P: Page> {
    document: DocumentContext,
    platform: Option<WebmailPlatform>,
    page: P,
    dispatcher: DispatcherHandle,
    clock: Arc<dyn Clock>,
    interception_timeout: Duration,
    fallback_ttl_ms: u64,
    held: HashMap<CorrelationId, HeldLink>,
    by_element: HashMap<ElementHandle, CorrelationId>,
    overlays: HashMap<OverlayId, CorrelationId>,
    next_overlay: u64,
    responses_tx: mpsc::UnboundedSender<VerdictResponse>,
    responses: mpsc::UnboundedReceiver<VerdictResponse>,
}

impl<P: Page> Sentinel<P> {
    /// Attach to a document
    ///
    /// Fails with `GuardError::UnsupportedHost` when `restrictToWebmail` is on
    /// and the document is not served by a known webmail host.
    pub fn attach(
        document: DocumentContext,
        page: P,
        dispatcher: DispatcherHandle,
        config: &GuardConfig,
    ) -> Result<Self> {
        let host = document.url.host_str().unwrap_or_default().to_string();
        let platform = WebmailPlatform::detect(&host);
        if config.restrict_to_webmail && platform.is_none() {
            return Err(GuardError::UnsupportedHost(host));
        }

        tracing::debug!(
            tab_id = document.tab_id.0,
            frame_id = document.frame_id.0,
            host = %host,
            platform = platform.map(|p| p.name()).unwrap_or("other"),
            "Sentinel attached"
        );

        let (responses_tx, responses) = mpsc::unbounded_channel();
        Ok(Self {
            document,
            platform,
            page,
            dispatcher,
            clock: Arc::new(SystemClock),
            interception_timeout: config.interception_timeout(),
            fallback_ttl_ms: config.fallback_ttl_ms,
            held: HashMap::new(),
            by_element: HashMap::new(),
            overlays: HashMap::new(),
            next_overlay: 0,
            responses_tx,
            responses,
        })
    }

    /// Replace the clock used for candidate timestamps and local fallbacks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn platform(&self) -> Option<WebmailPlatform> {
        self.platform
    }

    pub fn document(&self) -> &DocumentContext {
        &self.document
    }

    /// Handle a click
    ///
    /// When the outcome [suppresses navigation](InterceptOutcome::suppresses_navigation)
    /// the caller must prevent the page's default action.
    pub async fn intercept(&mut self, event: ClickEvent) -> InterceptOutcome {
        let Some(anchor) = self.page.anchor(event.element) else {
            return InterceptOutcome::NotALink;
        };

        if let Some(id) = self.by_element.get(&event.element) {
            tracing::debug!(correlation_id = %id, "Repeated click on held link ignored");
            return InterceptOutcome::Duplicate(id.clone());
        }

        let (resolved, normalized) = match classify_href(
            &anchor.href,
            Some(self.document.base_url()),
            Some(&self.document.url),
        ) {
            LinkTarget::Web {
                resolved,
                normalized,
            } => (resolved, normalized),
            LinkTarget::Exempt(reason) => {
                tracing::debug!(href = %anchor.href, reason = ?reason, "Link exempt from verification");
                return InterceptOutcome::Exempt(reason);
            }
        };

        let candidate = CandidateLink {
            correlation_id: CorrelationId::new(),
            raw_url: anchor.href.clone(),
            tab_id: self.document.tab_id,
            frame_id: self.document.frame_id,
            element: event.element,
            timestamp: self.clock.now_ms(),
        };
        let correlation_id = candidate.correlation_id.clone();
        let request = VerdictRequest {
            correlation_id: correlation_id.clone(),
            normalized_url: normalized.clone(),
            tab_id: self.document.tab_id,
        };

        // The interception window covers queueing as well as verification
        let mut deadline = Instant::now() + self.interception_timeout;
        let submitted = tokio::time::timeout_at(
            deadline,
            self.dispatcher
                .submit_with_reply(request, self.responses_tx.clone()),
        )
        .await;
        match submitted {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error = %e,
                    "Dispatcher unreachable, falling back locally"
                );
                deadline = Instant::now();
            }
            Err(_) => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    "Dispatcher queue full for the whole interception window, falling back locally"
                );
            }
        }

        tracing::debug!(
            correlation_id = %correlation_id,
            url = %normalized,
            "Navigation held pending verdict"
        );
        self.by_element.insert(event.element, correlation_id.clone());
        self.held.insert(
            correlation_id.clone(),
            HeldLink {
                candidate,
                normalized,
                navigate_to: resolved,
                target: navigation_target(&anchor, event.modifiers),
                state: HoldState::AwaitingVerdict { deadline },
            },
        );
        InterceptOutcome::Pending(correlation_id)
    }

    /// Wait for the next held navigation to be settled
    ///
    /// Returns `None` when nothing is awaiting a verdict. Verdicts for
    /// navigations that already timed out, or for unknown correlation ids,
    /// are dropped.
    pub async fn next_resolution(&mut self) -> Option<Resolution> {
        loop {
            let (expiring, deadline) = self.earliest_deadline()?;

            tokio::select! {
                Some(response) = self.responses.recv() => {
                    if let Some(resolution) = self.settle(&response.correlation_id, response.verdict, false) {
                        return Some(resolution);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let verdict = match self.held.get(&expiring) {
                        Some(held) => Arc::new(Verdict::fallback(
                            held.normalized.clone(),
                            self.clock.now_ms(),
                            self.fallback_ttl_ms,
                            "interception_timeout",
                        )),
                        None => continue,
                    };
                    tracing::warn!(
                        correlation_id = %expiring,
                        "No verdict within interception window"
                    );
                    if let Some(resolution) = self.settle(&expiring, verdict, true) {
                        return Some(resolution);
                    }
                }
            }
        }
    }

    /// Continue to the link behind an overlay
    ///
    /// Returns the navigation performed, or `None` for an unknown overlay.
    pub fn proceed(&mut self, overlay: OverlayId) -> Option<Navigation> {
        let held = self.take_overlay(overlay)?;
        tracing::info!(
            correlation_id = %held.candidate.correlation_id,
            url = %held.normalized,
            "User proceeded past warning"
        );
        self.page.navigate(&held.navigate_to, held.target);
        Some(Navigation {
            url: held.navigate_to,
            target: held.target,
        })
    }

    /// Discard the navigation behind an overlay
    ///
    /// The verification itself is not cancelled.
    pub fn cancel(&mut self, overlay: OverlayId) -> bool {
        match self.take_overlay(overlay) {
            Some(held) => {
                tracing::debug!(correlation_id = %held.candidate.correlation_id, "Held navigation cancelled");
                true
            }
            None => false,
        }
    }

    /// Close an overlay without an explicit choice, applying its default
    pub fn dismiss(&mut self, overlay: OverlayId) -> Option<OverlayAction> {
        let held = self.overlays.get(&overlay).and_then(|id| self.held.get(id))?;
        let HoldState::Overlay { default_action } = held.state else {
            return None;
        };
        match default_action {
            OverlayAction::Proceed => {
                self.proceed(overlay);
            }
            OverlayAction::Cancel => {
                self.cancel(overlay);
            }
        }
        Some(default_action)
    }

    /// Navigations still waiting for a verdict or a user decision
    pub fn pending_count(&self) -> usize {
        self.held.len()
    }

    pub fn overlay_count(&self) -> usize {
        self.overlays.len()
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut P {
        &mut self.page
    }

    /// Detach from a closing document, dropping held links and overlays
    pub fn detach(mut self) -> P {
        for id in self.overlays.keys() {
            self.page.remove_overlay(*id);
        }
        tracing::debug!(
            tab_id = self.document.tab_id.0,
            dropped = self.held.len(),
            "Sentinel detached"
        );
        self.page
    }

    fn earliest_deadline(&self) -> Option<(CorrelationId, Instant)> {
        self.held
            .iter()
            .filter_map(|(id, held)| match held.state {
                HoldState::AwaitingVerdict { deadline } => Some((id, deadline)),
                HoldState::Overlay { .. } => None,
            })
            .min_by_key(|(_, deadline)| *deadline)
            .map(|(id, deadline)| (id.clone(), deadline))
    }

    fn settle(
        &mut self,
        correlation_id: &CorrelationId,
        verdict: Arc<Verdict>,
        timed_out: bool,
    ) -> Option<Resolution> {
        let awaiting = matches!(
            self.held.get(correlation_id).map(|h| &h.state),
            Some(HoldState::AwaitingVerdict { .. })
        );
        if !awaiting {
            tracing::debug!(correlation_id = %correlation_id, "Stale verdict dropped");
            return None;
        }
        let mut held = self.held.remove(correlation_id)?;
        let element = held.candidate.element;
        self.by_element.remove(&element);

        if self.page.anchor(element).is_none() {
            tracing::debug!(correlation_id = %correlation_id, "Link target gone, verdict dropped");
            return Some(Resolution::TargetGone {
                correlation_id: correlation_id.clone(),
            });
        }

        let kind = match verdict.classification() {
            Classification::Safe => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    source = ?verdict.source(),
                    "Safe verdict, resuming navigation"
                );
                self.page.navigate(&held.navigate_to, held.target);
                return Some(Resolution::Navigated {
                    correlation_id: correlation_id.clone(),
                    url: held.navigate_to,
                    target: held.target,
                    verdict,
                });
            }
            Classification::Malicious => OverlayKind::Blocking,
            Classification::Unknown => OverlayKind::Advisory,
        };

        self.next_overlay += 1;
        let overlay = Overlay {
            id: OverlayId(self.next_overlay),
            kind,
            correlation_id: correlation_id.clone(),
            display_url: held.navigate_to.clone(),
            default_action: match kind {
                OverlayKind::Blocking => OverlayAction::Cancel,
                OverlayKind::Advisory => OverlayAction::Proceed,
            },
            reason: verdict.reason().map(str::to_string),
        };
        self.page.show_overlay(&overlay);
        tracing::info!(
            correlation_id = %correlation_id,
            kind = ?kind,
            url = %held.normalized,
            "Warning overlay shown"
        );

        held.state = HoldState::Overlay {
            default_action: overlay.default_action,
        };
        self.by_element.insert(element, correlation_id.clone());
        self.overlays.insert(overlay.id, correlation_id.clone());
        self.held.insert(correlation_id.clone(), held);

        Some(match kind {
            OverlayKind::Blocking => Resolution::Blocked {
                correlation_id: correlation_id.clone(),
                overlay_id: overlay.id,
                verdict,
            },
            OverlayKind::Advisory => Resolution::Advised {
                correlation_id: correlation_id.clone(),
                overlay_id: overlay.id,
                verdict,
                timed_out,
            },
        })
    }

    fn take_overlay(&mut self, overlay: OverlayId) -> Option<HeldLink> {
        let correlation_id = self.overlays.remove(&overlay)?;
        self.page.remove_overlay(overlay);
        let held = self.held.remove(&correlation_id)?;
        self.by_element.remove(&held.candidate.element);
        Some(held)
    }
}

/// Where the held navigation should open, from the anchor and click modifiers
pub fn navigation_target(anchor: &Anchor, modifiers: ClickModifiers) -> NavigationTarget {
    if modifiers.shift {
        NavigationTarget::NewWindow
    } else if modifiers.ctrl || modifiers.meta || modifiers.middle_button || anchor.opens_elsewhere() {
        NavigationTarget::NewTab
    } else {
        NavigationTarget::SameTab
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::source::{FailureMode, MemoryThreatSource};
    use crate::types::VerdictSource;
    use crate::verifier::Verifier;

    const INBOX: &str = "https://mail.google.com/mail/u/0/#inbox";

    fn document() -> DocumentContext {
        DocumentContext::new(TabId(3), FrameId(0), INBOX).unwrap()
    }

    fn attach(dispatcher: &Dispatcher, config: &GuardConfig) -> Sentinel<MemoryPage> {
        Sentinel::attach(document(), MemoryPage::new(), dispatcher.handle(), config).unwrap()
    }

    fn link(sentinel: &mut Sentinel<MemoryPage>, href: &str) -> ElementHandle {
        sentinel.page_mut().add_anchor(Anchor::new(href))
    }

    #[tokio::test]
    async fn test_attach_requires_webmail_host() {
        let config = GuardConfig::default();
        let dispatcher = Dispatcher::start(&config, Arc::new(MemoryThreatSource::new())).unwrap();
        let doc = DocumentContext::new(TabId(1), FrameId(0), "https://news.example/").unwrap();

        let err = Sentinel::attach(doc.clone(), MemoryPage::new(), dispatcher.handle(), &config)
            .err()
            .unwrap();
        assert!(matches!(err, GuardError::UnsupportedHost(host) if host == "news.example"));

        let relaxed = GuardConfig {
            restrict_to_webmail: false,
            ..Default::default()
        };
        let sentinel = Sentinel::attach(doc, MemoryPage::new(), dispatcher.handle(), &relaxed).unwrap();
        assert_eq!(sentinel.platform(), None);

        let outlook = DocumentContext::new(TabId(1), FrameId(0), "https://outlook.office.com/mail/").unwrap();
        let sentinel = Sentinel::attach(outlook, MemoryPage::new(), dispatcher.handle(), &config).unwrap();
        assert_eq!(sentinel.platform(), Some(WebmailPlatform::Outlook));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_exempt_links_are_not_held() {
        let config = GuardConfig::default();
        let source = Arc::new(MemoryThreatSource::new());
        let dispatcher = Dispatcher::start(&config, source.clone()).unwrap();
        let mut sentinel = attach(&dispatcher, &config);

        for (href, expected) in [
            ("javascript:void(0)", ExemptReason::Script),
            ("#section-2", ExemptReason::IntraPage),
            ("mailto:alice@example.com", ExemptReason::NonWeb("mailto".to_string())),
        ] {
            let element = link(&mut sentinel, href);
            let outcome = sentinel.intercept(ClickEvent::on(element)).await;
            assert_eq!(outcome, InterceptOutcome::Exempt(expected));
            assert!(!outcome.suppresses_navigation());
        }

        let plain = sentinel.page_mut().add_element();
        assert_eq!(sentinel.intercept(ClickEvent::on(plain)).await, InterceptOutcome::NotALink);

        assert_eq!(sentinel.pending_count(), 0);
        assert!(sentinel.next_resolution().await.is_none());
        assert_eq!(source.query_count(), 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_safe_link_resumes_with_captured_target() {
        let config = GuardConfig::default();
        let dispatcher = Dispatcher::start(&config, Arc::new(MemoryThreatSource::new())).unwrap();
        let mut sentinel = attach(&dispatcher, &config);
        let element = link(&mut sentinel, "https://safe-bank.example/login?utm_source=mail#top");

        let click = ClickEvent::on(element).with_modifiers(ClickModifiers {
            ctrl: true,
            ..Default::default()
        });
        let outcome = sentinel.intercept(click).await;
        assert!(outcome.suppresses_navigation());

        match sentinel.next_resolution().await.unwrap() {
            Resolution::Navigated { url, target, verdict, .. } => {
                // The original URL is resumed, not the normalized one
                assert_eq!(url, "https://safe-bank.example/login?utm_source=mail#top");
                assert_eq!(target, NavigationTarget::NewTab);
                assert_eq!(verdict.source(), VerdictSource::Live);
            }
            other => panic!("expected navigation, got {:?}", other),
        }
        assert_eq!(sentinel.page().navigations().len(), 1);
        assert_eq!(sentinel.pending_count(), 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeated_click_is_ignored() {
        let config = GuardConfig::default();
        let source = Arc::new(MemoryThreatSource::new());
        let dispatcher = Dispatcher::start(&config, source.clone()).unwrap();
        let mut sentinel = attach(&dispatcher, &config);
        let element = link(&mut sentinel, "https://a.example/");

        let first = sentinel.intercept(ClickEvent::on(element)).await;
        let InterceptOutcome::Pending(id) = first else {
            panic!("expected pending, got {:?}", first);
        };
        assert_eq!(
            sentinel.intercept(ClickEvent::on(element)).await,
            InterceptOutcome::Duplicate(id)
        );

        sentinel.next_resolution().await.unwrap();
        assert!(sentinel.next_resolution().await.is_none());
        assert_eq!(sentinel.page().navigations().len(), 1);
        assert_eq!(source.query_count(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_malicious_link_blocks_until_choice() {
        let config = GuardConfig::default();
        let source = Arc::new(MemoryThreatSource::with_flagged(["http://evil-phish.example/reset"]));
        let dispatcher = Dispatcher::start(&config, source).unwrap();
        let mut sentinel = attach(&dispatcher, &config);
        let element = link(&mut sentinel, "http://evil-phish.example/reset");

        sentinel.intercept(ClickEvent::on(element)).await;
        let resolution = sentinel.next_resolution().await.unwrap();
        assert!(matches!(resolution, Resolution::Blocked { .. }));
        let overlay_id = resolution.overlay_id().unwrap();

        let overlay = sentinel.page().overlay(overlay_id).unwrap();
        assert_eq!(overlay.kind, OverlayKind::Blocking);
        assert_eq!(overlay.default_action, OverlayAction::Cancel);
        assert!(sentinel.page().navigations().is_empty());

        // Clicking again while the overlay is up does nothing
        assert!(matches!(
            sentinel.intercept(ClickEvent::on(element)).await,
            InterceptOutcome::Duplicate(_)
        ));

        assert_eq!(sentinel.dismiss(overlay_id), Some(OverlayAction::Cancel));
        assert!(sentinel.page().navigations().is_empty());
        assert_eq!(sentinel.overlay_count(), 0);
        assert_eq!(sentinel.pending_count(), 0);
        assert!(!sentinel.cancel(overlay_id));
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interception_timeout_shows_advisory() {
        let config = GuardConfig::default();
        let source = Arc::new(MemoryThreatSource::new());
        source.set_latency(Duration::from_secs(5));
        // Verifier budget longer than the interception window
        let slow = GuardConfig {
            query_timeout_ms: 10_000,
            ..Default::default()
        };
        let dispatcher = Dispatcher::with_verifier(Verifier::new(source.clone(), &slow), 16);
        let mut sentinel = attach(&dispatcher, &config);
        let element = link(&mut sentinel, "https://slow.example/");

        let started = Instant::now();
        sentinel.intercept(ClickEvent::on(element)).await;
        let resolution = sentinel.next_resolution().await.unwrap();
        assert!(started.elapsed() >= config.interception_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));

        let Resolution::Advised {
            overlay_id,
            verdict,
            timed_out,
            ..
        } = resolution
        else {
            panic!("expected advisory, got {:?}", resolution);
        };
        assert!(timed_out);
        assert_eq!(verdict.source(), VerdictSource::Fallback);
        assert_eq!(
            sentinel.page().overlay(overlay_id).unwrap().default_action,
            OverlayAction::Proceed
        );

        // The late verdict is dropped; the advisory stays in charge
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(sentinel.next_resolution().await.is_none());
        assert_eq!(sentinel.overlay_count(), 1);

        assert_eq!(sentinel.dismiss(overlay_id), Some(OverlayAction::Proceed));
        assert_eq!(sentinel.page().navigations()[0].url, "https://slow.example/");
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_verdict_is_advisory_and_proceed_navigates() {
        let config = GuardConfig::default();
        let source = Arc::new(MemoryThreatSource::new());
        source.fail_next(1, FailureMode::Unavailable(503));
        let dispatcher = Dispatcher::start(&config, source).unwrap();
        let mut sentinel = attach(&dispatcher, &config);
        let element = link(&mut sentinel, "https://a.example/path");

        sentinel.intercept(ClickEvent::on(element)).await;
        let resolution = sentinel.next_resolution().await.unwrap();
        let Resolution::Advised { overlay_id, timed_out, .. } = resolution else {
            panic!("expected advisory, got {:?}", resolution);
        };
        assert!(!timed_out);
        assert_eq!(
            sentinel.page().overlay(overlay_id).unwrap().reason.as_deref(),
            Some("unavailable")
        );

        let navigation = sentinel.proceed(overlay_id).unwrap();
        assert_eq!(navigation.url, "https://a.example/path");
        assert_eq!(navigation.target, NavigationTarget::SameTab);
        assert!(sentinel.proceed(overlay_id).is_none());
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_target_gone_drops_verdict() {
        let config = GuardConfig::default();
        let dispatcher = Dispatcher::start(&config, Arc::new(MemoryThreatSource::new())).unwrap();
        let mut sentinel = attach(&dispatcher, &config);
        let element = link(&mut sentinel, "https://a.example/");

        sentinel.intercept(ClickEvent::on(element)).await;
        sentinel.page_mut().remove_element(element);

        let resolution = sentinel.next_resolution().await.unwrap();
        assert!(matches!(resolution, Resolution::TargetGone { .. }));
        assert!(sentinel.page().navigations().is_empty());
        assert_eq!(sentinel.pending_count(), 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatcher_gone_falls_back_locally() {
        let config = GuardConfig::default();
        let dispatcher = Dispatcher::start(&config, Arc::new(MemoryThreatSource::new())).unwrap();
        let mut sentinel = attach(&dispatcher, &config);
        dispatcher.shutdown().await;

        let element = link(&mut sentinel, "https://a.example/");
        assert!(sentinel.intercept(ClickEvent::on(element)).await.suppresses_navigation());

        let resolution = sentinel.next_resolution().await.unwrap();
        assert!(matches!(resolution, Resolution::Advised { timed_out: true, .. }));
    }

    #[tokio::test]
    async fn test_relative_href_resolves_against_base() {
        let config = GuardConfig::default();
        let source = Arc::new(MemoryThreatSource::with_flagged(["https://mail.google.com/evil/path"]));
        let dispatcher = Dispatcher::start(&config, source).unwrap();
        let mut sentinel = attach(&dispatcher, &config);
        let element = link(&mut sentinel, "/evil/path");

        sentinel.intercept(ClickEvent::on(element)).await;
        let resolution = sentinel.next_resolution().await.unwrap();
        assert!(matches!(resolution, Resolution::Blocked { .. }));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_fragment_links_under_foreign_base_are_verified() {
        let config = GuardConfig::default();
        let source = Arc::new(MemoryThreatSource::with_flagged(["https://other.example/page"]));
        let dispatcher = Dispatcher::start(&config, source.clone()).unwrap();
        let document = document().with_base(Url::parse("https://other.example/page").unwrap());
        let mut sentinel =
            Sentinel::attach(document, MemoryPage::new(), dispatcher.handle(), &config).unwrap();

        let own = link(&mut sentinel, "https://mail.google.com/mail/u/0/#sent");
        assert_eq!(
            sentinel.intercept(ClickEvent::on(own)).await,
            InterceptOutcome::Exempt(ExemptReason::IntraPage)
        );

        for href in ["#x", "https://other.example/page#x"] {
            let element = link(&mut sentinel, href);
            let outcome = sentinel.intercept(ClickEvent::on(element)).await;
            assert!(matches!(outcome, InterceptOutcome::Pending(_)), "{} was exempted", href);
            let resolution = sentinel.next_resolution().await.unwrap();
            assert!(matches!(resolution, Resolution::Blocked { .. }), "{}: {:?}", href, resolution);
        }
        assert_eq!(source.queries_for("https://other.example/page"), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_dispatcher_queue_does_not_stretch_interception() {
        let config = GuardConfig::default();
        let (handle, _queue) = DispatcherHandle::unserviced(1);
        let mut sentinel = Sentinel::attach(document(), MemoryPage::new(), handle, &config).unwrap();
        let first = link(&mut sentinel, "https://a.example/");
        let second = link(&mut sentinel, "https://b.example/");

        let started = Instant::now();
        assert!(matches!(
            sentinel.intercept(ClickEvent::on(first)).await,
            InterceptOutcome::Pending(_)
        ));
        assert!(matches!(
            sentinel.intercept(ClickEvent::on(second)).await,
            InterceptOutcome::Pending(_)
        ));
        assert!(started.elapsed() <= config.interception_timeout());

        for _ in 0..2 {
            let resolution = sentinel.next_resolution().await.unwrap();
            assert!(matches!(resolution, Resolution::Advised { timed_out: true, .. }));
        }
        assert!(started.elapsed() <= config.interception_timeout());
        assert_eq!(sentinel.overlay_count(), 2);
    }

    #[tokio::test]
    async fn test_detach_removes_overlays() {
        let config = GuardConfig::default();
        let source = Arc::new(MemoryThreatSource::with_flagged(["http://evil-phish.example/reset"]));
        let dispatcher = Dispatcher::start(&config, source).unwrap();
        let mut sentinel = attach(&dispatcher, &config);
        let element = link(&mut sentinel, "http://evil-phish.example/reset");

        sentinel.intercept(ClickEvent::on(element)).await;
        sentinel.next_resolution().await.unwrap();
        assert_eq!(sentinel.page().overlays().count(), 1);

        let page = sentinel.detach();
        assert_eq!(page.overlays().count(), 0);
        dispatcher.shutdown().await;
    }

    #[test]
    fn test_navigation_target_rules() {
        let plain = Anchor::new("https://a.example/");
        let blank = Anchor::new("https://a.example/").with_target("_blank");
        let none = ClickModifiers::default();

        assert_eq!(navigation_target(&plain, none), NavigationTarget::SameTab);
        assert_eq!(navigation_target(&blank, none), NavigationTarget::NewTab);
        assert_eq!(
            navigation_target(&plain, ClickModifiers { meta: true, ..none }),
            NavigationTarget::NewTab
        );
        assert_eq!(
            navigation_target(&plain, ClickModifiers { middle_button: true, ..none }),
            NavigationTarget::NewTab
        );
        assert_eq!(
            navigation_target(&blank, ClickModifiers { shift: true, ..none }),
            NavigationTarget::NewWindow
        );
        assert_eq!(
            navigation_target(&plain, ClickModifiers { alt: true, ..none }),
            NavigationTarget::SameTab
        );
    }
}
