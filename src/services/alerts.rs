//! Budget threshold alerting
//!
//! Fire-and-forget webhook notifications when spend crosses the warning or
//! critical threshold. A write-once marker in the shared store with its own
//! TTL deduplicates alerts across all concurrent instances, so a threshold
//! crossing produces one notification per period no matter how many
//! requests observe it. Delivery failures are logged and swallowed; nothing
//! here may fail or block the request path.

use crate::store::{keys, Store};
use std::sync::Arc;
use std::time::Duration;

/// Severity of a budget alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Webhook alert dispatcher with store-backed deduplication
pub struct Alerter {
    store: Arc<dyn Store>,
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl Alerter {
    pub fn new(store: Arc<dyn Store>, webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            store,
            webhook_url,
            client,
        }
    }

    /// Send one alert per (day, level) per dedup window.
    ///
    /// Infallible by contract: every failure is logged and dropped.
    pub async fn notify_once(&self, day: &str, level: AlertLevel, message: &str) {
        let marker = keys::alert(day, level.as_str());
        match self
            .store
            .set_nx_ex(&marker, "1", keys::ALERT_DEDUP_TTL_SECONDS)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(level = %level, "Alert already sent this period, skipping");
                return;
            }
            Err(err) => {
                // Without the marker we cannot dedupe; suppress rather than
                // spam one alert per request during a store outage.
                tracing::warn!(error = %err, level = %level, "Alert dedup marker unavailable, suppressing");
                return;
            }
        }

        tracing::warn!(level = %level, message = message, "Budget alert");

        let Some(url) = &self.webhook_url else {
            return;
        };

        let payload = serde_json::json!({
            "level": level.as_str(),
            "message": message,
            "date": day,
            "service": "rocket-community-proxy",
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(level = %level, "Alert webhook delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    level = %level,
                    "Alert webhook rejected"
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, level = %level, "Alert webhook delivery failed");
            }
        }
    }
}

impl std::fmt::Debug for Alerter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Alerter")
            .field("webhook_configured", &self.webhook_url.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn test_alert_fires_once_per_period() {
        let server = MockServer::start_async().await;
        let hook = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/hook")
                    .body_includes(r#""level":"warning""#);
                then.status(200);
            })
            .await;

        let alerter = Alerter::new(
            Arc::new(MemoryStore::new()),
            Some(server.url("/hook")),
        );

        alerter
            .notify_once("20260805", AlertLevel::Warning, "80% of budget used")
            .await;
        alerter
            .notify_once("20260805", AlertLevel::Warning, "80% of budget used")
            .await;

        hook.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_levels_dedupe_independently() {
        let server = MockServer::start_async().await;
        let hook = server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(200);
            })
            .await;

        let alerter = Alerter::new(
            Arc::new(MemoryStore::new()),
            Some(server.url("/hook")),
        );

        alerter
            .notify_once("20260805", AlertLevel::Warning, "80%")
            .await;
        alerter
            .notify_once("20260805", AlertLevel::Critical, "100%")
            .await;

        hook.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/hook");
                then.status(500);
            })
            .await;

        let alerter = Alerter::new(
            Arc::new(MemoryStore::new()),
            Some(server.url("/hook")),
        );

        // Must not panic or error
        alerter
            .notify_once("20260805", AlertLevel::Critical, "100%")
            .await;
    }

    #[tokio::test]
    async fn test_no_webhook_configured_is_a_noop() {
        let alerter = Alerter::new(Arc::new(MemoryStore::new()), None);
        alerter
            .notify_once("20260805", AlertLevel::Warning, "80%")
            .await;
    }
}
