//! Error types for a3s-linkguard

use thiserror::Error;

/// Errors that can occur in the link verification pipeline
///
/// Network and parse failures never reach the user: the verifier turns them
/// into fallback verdicts and the sentinel turns them into advisories. The
/// variants exist so those boundaries can decide what to do.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Connection-level failure talking to the threat source
    #[error("Connection error: {0}")]
    Connection(String),

    /// The threat source did not answer within the query budget
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The threat source asked us to back off
    #[error("Threat source rate limited the request (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The threat source answered with a non-success status
    #[error("Threat source unavailable: HTTP {status}")]
    Unavailable { status: u16 },

    /// The threat source answered with a body we could not interpret
    #[error("Malformed threat source response: {0}")]
    MalformedResponse(String),

    /// Link target could not be parsed or normalized
    #[error("Malformed URL '{url}': {reason}")]
    MalformedUrl { url: String, reason: String },

    /// Sentinel attach attempted on a host that is not a supported webmail client
    #[error("Unsupported host: {0}")]
    UnsupportedHost(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The dispatcher has been shut down
    #[error("Dispatcher is shut down")]
    Shutdown,

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML config parse failure
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// Whether this failure is eligible for the single immediate retry.
    ///
    /// Only connection-level failures qualify; timeouts never do.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, GuardError::Connection(_))
    }

    /// Short machine-readable label used in logs and fallback reasons
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::Connection(_) => "connection",
            GuardError::Timeout(_) => "timeout",
            GuardError::RateLimited { .. } => "rate_limited",
            GuardError::Unavailable { .. } => "unavailable",
            GuardError::MalformedResponse(_) => "malformed_response",
            GuardError::MalformedUrl { .. } => "malformed_url",
            GuardError::UnsupportedHost(_) => "unsupported_host",
            GuardError::Config(_) | GuardError::ConfigParse(_) => "config",
            GuardError::Shutdown => "shutdown",
            GuardError::Serialization(_) => "serialization",
            GuardError::Io(_) => "io",
        }
    }
}

/// Result type alias for link verification operations
pub type Result<T> = std::result::Result<T, GuardError>;
