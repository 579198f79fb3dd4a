//! Host page abstraction
//!
//! The sentinel never touches the DOM directly. Everything it may do to a page
//! goes through [`Page`]: resolve a clicked element to its anchor, resume a
//! navigation, and insert or remove an overlay.

use crate::types::{CorrelationId, ElementHandle};
use std::collections::{BTreeMap, HashMap};

/// Where a resumed navigation opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationTarget {
    SameTab,
    NewTab,
    NewWindow,
}

/// The anchor a click landed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// Attribute value as written, possibly relative
    pub href: String,
    /// The anchor's `target` attribute
    pub target: Option<String>,
}

impl Anchor {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Whether the `target` attribute names a browsing context other than
    /// the current one
    pub fn opens_elsewhere(&self) -> bool {
        match self.target.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(t) => !["_self", "_top", "_parent"]
                .iter()
                .any(|own| t.eq_ignore_ascii_case(own)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    /// Full-viewport warning for a MALICIOUS verdict
    Blocking,
    /// Lighter warning when no definitive verdict is available
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    /// Continue to the link anyway
    Proceed,
    /// Discard the held navigation
    Cancel,
}

/// Warning shown in place of a held navigation
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub id: OverlayId,
    pub kind: OverlayKind,
    pub correlation_id: CorrelationId,
    /// URL shown to the user
    pub display_url: String,
    /// Applied when the overlay is dismissed without a choice
    pub default_action: OverlayAction,
    /// Fallback reason for advisories
    pub reason: Option<String>,
}

/// Mutations the sentinel is allowed to perform on a host page
pub trait Page: Send {
    /// Resolve a clicked element to its enclosing anchor
    ///
    /// `None` when the element is not inside an anchor or no longer exists.
    fn anchor(&self, element: ElementHandle) -> Option<Anchor>;

    /// Resume a held navigation
    fn navigate(&mut self, url: &str, target: NavigationTarget);

    fn show_overlay(&mut self, overlay: &Overlay);

    fn remove_overlay(&mut self, id: OverlayId);
}

/// A navigation performed through [`MemoryPage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub url: String,
    pub target: NavigationTarget,
}

/// In-process page used by tests and embedder harnesses
#[derive(Debug, Default)]
pub struct MemoryPage {
    elements: HashMap<ElementHandle, Option<Anchor>>,
    next_handle: u64,
    navigations: Vec<Navigation>,
    overlays: BTreeMap<OverlayId, Overlay>,
}

impl MemoryPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an anchor and return its handle
    pub fn add_anchor(&mut self, anchor: Anchor) -> ElementHandle {
        self.insert(Some(anchor))
    }

    /// Add an element that is not inside any anchor
    pub fn add_element(&mut self) -> ElementHandle {
        self.insert(None)
    }

    /// Remove an element, as when the mail view re-renders
    pub fn remove_element(&mut self, element: ElementHandle) {
        self.elements.remove(&element);
    }

    pub fn navigations(&self) -> &[Navigation] {
        &self.navigations
    }

    /// Currently visible overlays, oldest first
    pub fn overlays(&self) -> impl Iterator<Item = &Overlay> {
        self.overlays.values()
    }

    pub fn overlay(&self, id: OverlayId) -> Option<&Overlay> {
        self.overlays.get(&id)
    }

    fn insert(&mut self, anchor: Option<Anchor>) -> ElementHandle {
        self.next_handle += 1;
        let handle = ElementHandle(self.next_handle);
        self.elements.insert(handle, anchor);
        handle
    }
}

impl Page for MemoryPage {
    fn anchor(&self, element: ElementHandle) -> Option<Anchor> {
        self.elements.get(&element)?.clone()
    }

    fn navigate(&mut self, url: &str, target: NavigationTarget) {
        self.navigations.push(Navigation {
            url: url.to_string(),
            target,
        });
    }

    fn show_overlay(&mut self, overlay: &Overlay) {
        self.overlays.insert(overlay.id, overlay.clone());
    }

    fn remove_overlay(&mut self, id: OverlayId) {
        self.overlays.remove(&id);
    }
}
