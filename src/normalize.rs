//! URL normalization and link target classification
//!
//! Two URLs that normalize to the same string share one verdict and one
//! in-flight query, so everything that keys the cache or the dispatcher goes
//! through [`normalize`]. Canonical form:
//!
//! - scheme and host lowercased, default ports dropped (handled by `url`)
//! - dot segments resolved, empty path becomes `/`
//! - fragment removed, trailing dot on the host removed
//! - known tracking query parameters removed, remaining order preserved

use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Query parameters stripped during normalization (plus any `utm_*`)
pub const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "dclid", "mc_cid", "mc_eid", "_hsenc", "_hsmi", "yclid",
    "igshid", "mkt_tok",
];

const TRACKING_PREFIX: &str = "utm_";

/// A canonical http(s) URL; the key for caching and deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedUrl(String);

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Host component (always present for a normalized URL)
    pub fn host(&self) -> &str {
        let rest = self
            .0
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.0);
        let authority = rest.split(['/', '?']).next().unwrap_or(rest);
        let host_port = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
        if host_port.starts_with('[') {
            host_port
                .split_once(']')
                .map(|(h, _)| &host_port[..h.len() + 1])
                .unwrap_or(host_port)
        } else {
            host_port.split(':').next().unwrap_or(host_port)
        }
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NormalizedUrl {
    type Error = GuardError;

    fn try_from(value: String) -> Result<Self> {
        normalize(&value, None)
    }
}

impl From<NormalizedUrl> for String {
    fn from(url: NormalizedUrl) -> Self {
        url.0
    }
}

/// Why a link is allowed without consulting the threat source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExemptReason {
    /// `javascript:` or another script protocol
    Script,
    /// Anchor within the current document
    IntraPage,
    /// Non-web-navigable scheme such as `mailto:` or `tel:`
    NonWeb(String),
    /// href could not be parsed or resolved
    Malformed(String),
}

/// What a clicked href turns out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// A web destination that needs a verdict
    Web {
        /// Absolute URL to navigate to, fragment and query untouched
        resolved: String,
        normalized: NormalizedUrl,
    },
    /// Allowed locally, no remote check
    Exempt(ExemptReason),
}

/// Classify an anchor's href
///
/// Relative hrefs resolve against `base` (the document's `<base href>`, or
/// the document itself). A link is intra-page only when it resolves to
/// `document` with nothing but the fragment changed.
pub fn classify_href(href: &str, base: Option<&Url>, document: Option<&Url>) -> LinkTarget {
    let href = href.trim();
    let url = match parse(href, base.or(document)) {
        Ok(url) => url,
        Err(e) => return LinkTarget::Exempt(ExemptReason::Malformed(e.to_string())),
    };

    match url.scheme() {
        "http" | "https" => {}
        "javascript" | "vbscript" | "livescript" => {
            return LinkTarget::Exempt(ExemptReason::Script)
        }
        other => return LinkTarget::Exempt(ExemptReason::NonWeb(other.to_string())),
    }

    if let Some(document) = document {
        if (href.is_empty() || url.fragment().is_some()) && same_document(&url, document) {
            return LinkTarget::Exempt(ExemptReason::IntraPage);
        }
    }

    let resolved = url.to_string();
    match canonicalize(url) {
        Ok(normalized) => LinkTarget::Web {
            resolved,
            normalized,
        },
        Err(e) => LinkTarget::Exempt(ExemptReason::Malformed(e.to_string())),
    }
}

/// Normalize an http(s) URL, resolving it against `base` when relative
pub fn normalize(raw: &str, base: Option<&Url>) -> Result<NormalizedUrl> {
    let raw = raw.trim();
    let url = parse(raw, base).map_err(|e| malformed(raw, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => canonicalize(url),
        other => Err(malformed(raw, format!("unsupported scheme '{}'", other))),
    }
}

/// Whether a query parameter name is on the tracking allow-list
pub fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with(TRACKING_PREFIX) || TRACKING_PARAMS.contains(&name.as_str())
}

fn parse(raw: &str, base: Option<&Url>) -> std::result::Result<Url, url::ParseError> {
    match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    }
}

fn canonicalize(mut url: Url) -> Result<NormalizedUrl> {
    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => return Err(malformed(url.as_str(), "missing host")),
    };

    if host.len() > 1 && host.ends_with('.') {
        url.set_host(Some(host.trim_end_matches('.')))
            .map_err(|e| malformed(&host, e.to_string()))?;
    }

    url.set_fragment(None);
    strip_tracking_params(&mut url);

    Ok(NormalizedUrl(url.into()))
}

fn strip_tracking_params(url: &mut Url) {
    let Some(query) = url.query() else {
        return;
    };

    let kept = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| !is_tracking_param(pair.split('=').next().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("&");

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&kept));
    }
}

fn same_document(url: &Url, document: &Url) -> bool {
    let mut a = url.clone();
    let mut b = document.clone();
    a.set_fragment(None);
    b.set_fragment(None);
    a == b
}

fn malformed(url: &str, reason: impl Into<String>) -> GuardError {
    GuardError::MalformedUrl {
        url: url.to_string(),
        reason: reason.into(),
    }
}
