//! Pipeline configuration
//!
//! Every field has a default, so an empty TOML file is a valid config.
//! Keys are camelCase to match the extension's options page.

use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// User-configurable settings for interception, verification and caching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardConfig {
    /// How long a sentinel holds a click before falling back to an advisory
    #[serde(default = "default_interception_timeout_ms")]
    pub interception_timeout_ms: u64,

    /// Budget for one external lookup, retry included
    ///
    /// Must be strictly below `interception_timeout_ms`.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Maximum number of cached verdicts
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// TTL for SAFE verdicts
    #[serde(default = "default_safe_ttl_ms")]
    pub safe_ttl_ms: u64,

    /// TTL for MALICIOUS verdicts
    #[serde(default = "default_malware_ttl_ms")]
    pub malware_ttl_ms: u64,

    /// TTL for FALLBACK verdicts, short so outages are retried soon
    #[serde(default = "default_fallback_ttl_ms")]
    pub fallback_ttl_ms: u64,

    /// Allow one immediate retry after a connection-level failure
    #[serde(default = "default_true")]
    pub retry_on_connection_failure: bool,

    /// Threat source lookup endpoint (required by the HTTP source)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bearer token for the threat source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Send a SHA-256 digest instead of the URL itself
    #[serde(default = "default_true")]
    pub hash_urls: bool,

    /// Only attach sentinels to known webmail hosts
    #[serde(default = "default_true")]
    pub restrict_to_webmail: bool,

    /// Capacity of the dispatcher's request queue
    #[serde(default = "default_response_buffer")]
    pub response_buffer: usize,
}

fn default_interception_timeout_ms() -> u64 {
    2_500
}

fn default_query_timeout_ms() -> u64 {
    1_500
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_safe_ttl_ms() -> u64 {
    10 * 60 * 1_000
}

fn default_malware_ttl_ms() -> u64 {
    30 * 60 * 1_000
}

fn default_fallback_ttl_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_response_buffer() -> usize {
    256
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            interception_timeout_ms: default_interception_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            cache_capacity: default_cache_capacity(),
            safe_ttl_ms: default_safe_ttl_ms(),
            malware_ttl_ms: default_malware_ttl_ms(),
            fallback_ttl_ms: default_fallback_ttl_ms(),
            retry_on_connection_failure: true,
            endpoint: None,
            api_key: None,
            hash_urls: true,
            restrict_to_webmail: true,
            response_buffer: default_response_buffer(),
        }
    }
}

impl GuardConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GuardError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: GuardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML with the API key masked
    pub fn to_toml_string(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.api_key.is_some() {
            shown.api_key = Some("********".to_string());
        }
        toml::to_string_pretty(&shown).map_err(|e| GuardError::Config(e.to_string()))
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(GuardError::Config("cacheCapacity must be at least 1".into()));
        }
        if self.response_buffer == 0 {
            return Err(GuardError::Config("responseBuffer must be at least 1".into()));
        }
        for (name, value) in [
            ("interceptionTimeoutMs", self.interception_timeout_ms),
            ("queryTimeoutMs", self.query_timeout_ms),
            ("safeTtlMs", self.safe_ttl_ms),
            ("malwareTtlMs", self.malware_ttl_ms),
            ("fallbackTtlMs", self.fallback_ttl_ms),
        ] {
            if value == 0 {
                return Err(GuardError::Config(format!("{} must be greater than 0", name)));
            }
        }
        if self.query_timeout_ms >= self.interception_timeout_ms {
            return Err(GuardError::Config(format!(
                "queryTimeoutMs ({}) must be below interceptionTimeoutMs ({})",
                self.query_timeout_ms, self.interception_timeout_ms
            )));
        }
        if self.fallback_ttl_ms >= self.safe_ttl_ms.min(self.malware_ttl_ms) {
            return Err(GuardError::Config(
                "fallbackTtlMs must be shorter than safeTtlMs and malwareTtlMs".into(),
            ));
        }
        if let Some(endpoint) = &self.endpoint {
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                GuardError::Config(format!("Invalid endpoint '{}': {}", endpoint, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(GuardError::Config(format!(
                    "Endpoint '{}' must use http or https",
                    endpoint
                )));
            }
        }
        Ok(())
    }

    pub fn interception_timeout(&self) -> Duration {
        Duration::from_millis(self.interception_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}
