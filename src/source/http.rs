//! HTTP threat source: queries a remote lookup endpoint with reqwest
//!
//! Wire contract: `POST {endpoint}` with `{"url": ...}` or, when hashing is
//! enabled, `{"urlHash": "<sha256 hex>"}`. A 200 answer carries
//! `{"match": bool, "confidence"?: number}`.

use super::{ThreatLookup, ThreatSource};
use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::normalize::NormalizedUrl;
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(rename = "match")]
    matched: bool,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Threat source backed by a remote HTTP lookup service
pub struct HttpThreatSource {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    hash_urls: bool,
}

impl HttpThreatSource {
    /// Build a source from configuration; `endpoint` is required
    pub fn new(config: &GuardConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| GuardError::Config("endpoint is required for the HTTP threat source".into()))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("a3s-linkguard/", env!("CARGO_PKG_VERSION")))
            .timeout(config.query_timeout())
            .build()
            .map_err(|e| GuardError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            hash_urls: config.hash_urls,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body<'a>(&self, url: &'a NormalizedUrl) -> LookupRequest<'a> {
        if self.hash_urls {
            LookupRequest {
                url: None,
                url_hash: Some(url_digest(url)),
            }
        } else {
            LookupRequest {
                url: Some(url.as_str()),
                url_hash: None,
            }
        }
    }
}

/// Hex-encoded SHA-256 of a normalized URL
pub fn url_digest(url: &NormalizedUrl) -> String {
    hex::encode(Sha256::digest(url.as_str().as_bytes()))
}

fn map_transport_error(endpoint: &str, e: reqwest::Error) -> GuardError {
    if e.is_timeout() {
        GuardError::Timeout(format!("{}: {}", endpoint, e))
    } else {
        GuardError::Connection(format!("{}: {}", endpoint, e))
    }
}

fn parse_body(status: StatusCode, body: &[u8]) -> Result<ThreatLookup> {
    let parsed: LookupResponse = serde_json::from_slice(body).map_err(|e| {
        GuardError::MalformedResponse(format!("HTTP {} body is not a lookup result: {}", status, e))
    })?;
    Ok(if parsed.matched {
        ThreatLookup::Match {
            confidence: parsed.confidence,
        }
    } else {
        ThreatLookup::NoMatch {
            confidence: parsed.confidence,
        }
    })
}

#[async_trait]
impl ThreatSource for HttpThreatSource {
    async fn lookup(&self, url: &NormalizedUrl) -> Result<ThreatLookup> {
        let mut request = self.client.post(&self.endpoint).json(&self.request_body(url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(&self.endpoint, e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(GuardError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(GuardError::Unavailable {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| map_transport_error(&self.endpoint, e))?;
        let lookup = parse_body(status, &body)?;

        tracing::debug!(
            endpoint = %self.endpoint,
            matched = lookup.is_match(),
            "Threat lookup answered"
        );
        Ok(lookup)
    }

    fn name(&self) -> &str {
        "http"
    }
}
