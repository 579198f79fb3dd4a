//! Supported webmail clients
//!
//! Sentinels attach only to documents served by a known webmail host unless
//! `restrictToWebmail` is turned off.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A webmail client the sentinel knows how to protect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WebmailPlatform {
    Gmail,
    Outlook,
}

const GMAIL_HOSTS: &[&str] = &["mail.google.com"];
const OUTLOOK_HOSTS: &[&str] = &[
    "outlook.live.com",
    "outlook.office.com",
    "outlook.office365.com",
];

impl WebmailPlatform {
    /// Detect the platform from a document host (case-insensitive)
    pub fn detect(host: &str) -> Option<Self> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if GMAIL_HOSTS.contains(&host.as_str()) {
            Some(WebmailPlatform::Gmail)
        } else if OUTLOOK_HOSTS.contains(&host.as_str()) {
            Some(WebmailPlatform::Outlook)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WebmailPlatform::Gmail => "gmail",
            WebmailPlatform::Outlook => "outlook",
        }
    }
}

impl fmt::Display for WebmailPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_gmail() {
        assert_eq!(
            WebmailPlatform::detect("mail.google.com"),
            Some(WebmailPlatform::Gmail)
        );
        assert_eq!(
            WebmailPlatform::detect("MAIL.Google.com."),
            Some(WebmailPlatform::Gmail)
        );
    }

    #[test]
    fn test_detect_outlook() {
        for host in ["outlook.live.com", "outlook.office.com", "outlook.office365.com"] {
            assert_eq!(WebmailPlatform::detect(host), Some(WebmailPlatform::Outlook));
        }
    }

    #[test]
    fn test_detect_rejects_lookalikes() {
        assert_eq!(WebmailPlatform::detect("mail.google.com.evil.example"), None);
        assert_eq!(WebmailPlatform::detect("google.com"), None);
        assert_eq!(WebmailPlatform::detect("docs.google.com"), None);
    }
}
