//! Usage analytics
//!
//! Each completed generation is folded into daily aggregate counters and a
//! per-identity leaderboard in the shared store. Writes are pipelined
//! atomic increments; the 7-day retention TTL is refreshed redundantly on
//! every write. Reads tolerate missing keys and always return a fully
//! populated metrics object, so a quiet day reads as zeros rather than an
//! error.

use crate::middleware::identity::Tier;
use crate::store::{keys, Store, StoreError};
use crate::utils::time::{day_stamp, day_stamp_for};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Callers returned in the top-callers leaderboard
const TOP_CALLERS_COUNT: usize = 10;

/// One completed generation, as recorded
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub identity: String,
    pub tier: Tier,
    pub tokens: u32,
    pub cost_micros: i64,
    pub credential: String,
}

/// A leaderboard entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerUsage {
    pub identity: String,
    pub requests: i64,
}

/// Daily aggregate metrics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub date: String,
    pub requests: i64,
    pub tokens: i64,
    pub cost_micros: i64,
    pub anonymous_requests: i64,
    pub authenticated_requests: i64,
    pub top_callers: Vec<CallerUsage>,
}

/// Optional external ingestion endpoint for raw usage events
pub struct AnalyticsSink {
    url: String,
    key: String,
    client: reqwest::Client,
}

impl AnalyticsSink {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            url: url.into(),
            key: key.into(),
            client,
        }
    }

    /// Forward one event. Failures are logged and dropped; the sink is a
    /// best-effort mirror of the store aggregates.
    async fn forward(&self, event: &UsageEvent) {
        let payload = serde_json::json!({
            "identity": event.identity,
            "tier": event.tier.as_str(),
            "tokens": event.tokens,
            "costMicros": event.cost_micros,
            "credential": event.credential,
        });

        match self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.key))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Analytics sink rejected event");
            }
            Err(err) => {
                tracing::warn!(error = %err, "Analytics sink delivery failed");
            }
        }
    }
}

impl std::fmt::Debug for AnalyticsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsSink")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Records and aggregates per-request usage
#[derive(Clone)]
pub struct UsageAnalytics {
    store: Arc<dyn Store>,
    sink: Option<Arc<AnalyticsSink>>,
}

impl UsageAnalytics {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, sink: None }
    }

    /// Mirror raw events to an external sink in addition to the store
    pub fn with_sink(mut self, sink: AnalyticsSink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Fold one event into today's aggregates.
    ///
    /// Called off the request path; errors bubble to the caller which logs
    /// and drops them.
    pub async fn record(&self, event: &UsageEvent) -> Result<(), StoreError> {
        let day = day_stamp(Utc::now());

        let counters = [
            (keys::usage_requests(&day), 1),
            (keys::usage_tokens(&day), i64::from(event.tokens)),
            (keys::usage_cost(&day), event.cost_micros),
            (keys::usage_tier(&day, event.tier.as_str()), 1),
        ];
        self.store
            .incr_many_ex(&counters, keys::RETENTION_SECONDS)
            .await?;

        self.store
            .zincr_ex(
                &keys::usage_callers(&day),
                &event.identity,
                1,
                keys::RETENTION_SECONDS,
            )
            .await?;

        if let Some(sink) = &self.sink {
            sink.forward(event).await;
        }

        tracing::debug!(
            identity = %event.identity,
            tier = %event.tier,
            tokens = event.tokens,
            cost_micros = event.cost_micros,
            credential = %event.credential,
            "Usage recorded"
        );

        Ok(())
    }

    /// Aggregate metrics for one day; absent counters read as zero.
    pub async fn read_aggregate(&self, date: NaiveDate) -> Result<UsageMetrics, StoreError> {
        let day = day_stamp_for(date);

        let counter_keys = vec![
            keys::usage_requests(&day),
            keys::usage_tokens(&day),
            keys::usage_cost(&day),
            keys::usage_tier(&day, Tier::Anonymous.as_str()),
            keys::usage_tier(&day, Tier::Authenticated.as_str()),
        ];
        let values = self.store.mget(&counter_keys).await?;
        let counter = |idx: usize| -> i64 {
            values
                .get(idx)
                .and_then(|v| v.as_ref())
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
        };

        let top_callers = self
            .store
            .ztop(&keys::usage_callers(&day), TOP_CALLERS_COUNT)
            .await?
            .into_iter()
            .map(|(identity, requests)| CallerUsage { identity, requests })
            .collect();

        Ok(UsageMetrics {
            date: day,
            requests: counter(0),
            tokens: counter(1),
            cost_micros: counter(2),
            anonymous_requests: counter(3),
            authenticated_requests: counter(4),
            top_callers,
        })
    }
}

impl std::fmt::Debug for UsageAnalytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageAnalytics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn event(identity: &str, tier: Tier, tokens: u32, cost_micros: i64) -> UsageEvent {
        UsageEvent {
            identity: identity.to_string(),
            tier,
            tokens,
            cost_micros,
            credential: "primary".to_string(),
        }
    }

    #[tokio::test]
    async fn test_events_fold_into_daily_aggregate() {
        let analytics = UsageAnalytics::new(Arc::new(MemoryStore::new()));

        analytics
            .record(&event("ip:aaa", Tier::Anonymous, 100, 50))
            .await
            .unwrap();
        analytics
            .record(&event("github:octocat", Tier::Authenticated, 200, 120))
            .await
            .unwrap();
        analytics
            .record(&event("github:octocat", Tier::Authenticated, 300, 180))
            .await
            .unwrap();

        let metrics = analytics
            .read_aggregate(Utc::now().date_naive())
            .await
            .unwrap();

        assert_eq!(metrics.requests, 3);
        assert_eq!(metrics.tokens, 600);
        assert_eq!(metrics.cost_micros, 350);
        assert_eq!(metrics.anonymous_requests, 1);
        assert_eq!(metrics.authenticated_requests, 2);
    }

    #[tokio::test]
    async fn test_top_callers_ranked_by_requests() {
        let analytics = UsageAnalytics::new(Arc::new(MemoryStore::new()));

        for _ in 0..3 {
            analytics
                .record(&event("github:busy", Tier::Authenticated, 10, 5))
                .await
                .unwrap();
        }
        analytics
            .record(&event("ip:quiet", Tier::Anonymous, 10, 5))
            .await
            .unwrap();

        let metrics = analytics
            .read_aggregate(Utc::now().date_naive())
            .await
            .unwrap();

        assert_eq!(metrics.top_callers.len(), 2);
        assert_eq!(metrics.top_callers[0].identity, "github:busy");
        assert_eq!(metrics.top_callers[0].requests, 3);
    }

    #[tokio::test]
    async fn test_sink_receives_forwarded_events() {
        use httpmock::{Method::POST, MockServer};

        let server = MockServer::start_async().await;
        let sink_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/ingest")
                    .header("authorization", "Bearer sink-key")
                    .body_includes(r#""tier":"anonymous""#);
                then.status(202);
            })
            .await;

        let analytics = UsageAnalytics::new(Arc::new(MemoryStore::new()))
            .with_sink(AnalyticsSink::new(server.url("/ingest"), "sink-key"));

        analytics
            .record(&event("ip:aaa", Tier::Anonymous, 100, 50))
            .await
            .unwrap();

        sink_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_fail_record() {
        use httpmock::{Method::POST, MockServer};

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/ingest");
                then.status(500);
            })
            .await;

        let analytics = UsageAnalytics::new(Arc::new(MemoryStore::new()))
            .with_sink(AnalyticsSink::new(server.url("/ingest"), "sink-key"));

        // Store aggregates still update when the sink is down
        analytics
            .record(&event("ip:aaa", Tier::Anonymous, 100, 50))
            .await
            .unwrap();
        let metrics = analytics
            .read_aggregate(Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(metrics.requests, 1);
    }

    #[tokio::test]
    async fn test_quiet_day_reads_as_zeros() {
        let analytics = UsageAnalytics::new(Arc::new(MemoryStore::new()));

        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let metrics = analytics.read_aggregate(date).await.unwrap();

        assert_eq!(metrics.date, "20200101");
        assert_eq!(metrics.requests, 0);
        assert_eq!(metrics.tokens, 0);
        assert_eq!(metrics.cost_micros, 0);
        assert!(metrics.top_callers.is_empty());
    }
}
