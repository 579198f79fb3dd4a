use crate::config::GuardConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{GuardError, Result};
use crate::normalize::normalize;
use crate::source::HttpThreatSource;
use crate::types::{TabId, Verdict, VerdictRequest};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

/// One line of `check` output
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: String,
}

/// Execute the `check` command: verify URLs through the HTTP threat source.
pub async fn execute(urls: &[String], base: Option<&str>, config: &GuardConfig) -> Result<()> {
    let source = HttpThreatSource::new(config)?;
    let dispatcher = Dispatcher::start(config, Arc::new(source))?;

    let reports = check_all(&dispatcher, urls, base).await?;
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }

    let stats = dispatcher.stats().await?;
    tracing::info!(
        safe = stats.safe,
        malicious = stats.malicious,
        unknown = stats.unknown,
        cache_hits = stats.cache_hits,
        deduplicated = stats.deduplicated,
        "Check finished"
    );
    dispatcher.shutdown().await;
    Ok(())
}

/// Resolve every URL concurrently; unparseable URLs are reported, not fatal
pub async fn check_all(
    dispatcher: &Dispatcher,
    urls: &[String],
    base: Option<&str>,
) -> Result<Vec<CheckReport>> {
    let base = base
        .map(|b| {
            Url::parse(b).map_err(|e| GuardError::MalformedUrl {
                url: b.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()?;

    let checks = urls.iter().map(|raw| {
        let normalized = normalize(raw, base.as_ref());
        async move {
            let outcome = match normalized {
                Ok(url) => dispatcher
                    .submit(VerdictRequest::new(url, TabId(0)))
                    .await
                    .map(|verdict| verdict.as_ref().clone()),
                Err(e) => Err(e),
            };
            let checked_at = chrono::Utc::now().to_rfc3339();
            match outcome {
                Ok(verdict) => CheckReport {
                    url: raw.clone(),
                    verdict: Some(verdict),
                    error: None,
                    checked_at,
                },
                Err(e) => CheckReport {
                    url: raw.clone(),
                    verdict: None,
                    error: Some(e.to_string()),
                    checked_at,
                },
            }
        }
    });

    Ok(futures::future::join_all(checks).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryThreatSource;
    use crate::types::Classification;

    #[tokio::test]
    async fn test_check_all_reports_each_url() {
        let config = GuardConfig::default();
        let source = Arc::new(MemoryThreatSource::with_flagged(["https://mail.google.com/evil"]));
        let dispatcher = Dispatcher::start(&config, source.clone()).unwrap();

        let urls = vec![
            "https://safe-bank.example/login".to_string(),
            "/evil".to_string(),
            "mailto:someone@example.com".to_string(),
        ];
        let reports = check_all(&dispatcher, &urls, Some("https://mail.google.com/mail/"))
            .await
            .unwrap();

        assert_eq!(reports.len(), 3);
        assert_eq!(
            reports[0].verdict.as_ref().unwrap().classification(),
            Classification::Safe
        );
        assert_eq!(
            reports[1].verdict.as_ref().unwrap().classification(),
            Classification::Malicious
        );
        assert!(reports[2].verdict.is_none());
        assert!(reports[2].error.as_ref().unwrap().contains("unsupported scheme"));
        assert_eq!(source.query_count(), 2);

        let line = serde_json::to_string(&reports[0]).unwrap();
        assert!(line.contains("\"checkedAt\""));
        assert!(!line.contains("\"error\""));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_base_is_error() {
        let dispatcher =
            Dispatcher::start(&GuardConfig::default(), Arc::new(MemoryThreatSource::new())).unwrap();
        let err = check_all(&dispatcher, &["/x".to_string()], Some("not a base"))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::MalformedUrl { .. }));
        dispatcher.shutdown().await;
    }
}
