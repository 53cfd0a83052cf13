//! Aggregate daily budget tracking
//!
//! A single fixed-point counter in the shared store holds today's spend in
//! micro-dollars. `is_exceeded` gates admission before dispatch;
//! `record_spend` runs after confirmed generations (off the request path)
//! and triggers threshold alerts through the deduplicating alerter.

use crate::services::alerts::{AlertLevel, Alerter};
use crate::store::{keys, Store, StoreError};
use crate::utils::time::day_stamp;
use chrono::Utc;
use std::sync::Arc;

/// Warning threshold as a percentage of the cap
const WARNING_THRESHOLD_PCT: i64 = 80;

/// Tracks aggregate spend against the configured daily cap
pub struct BudgetTracker {
    store: Arc<dyn Store>,
    cap_micros: i64,
    alerter: Arc<Alerter>,
}

impl BudgetTracker {
    pub fn new(store: Arc<dyn Store>, cap_micros: i64, alerter: Arc<Alerter>) -> Self {
        Self {
            store,
            cap_micros,
            alerter,
        }
    }

    pub fn cap_micros(&self) -> i64 {
        self.cap_micros
    }

    /// Whether today's cumulative spend has reached the cap.
    ///
    /// Store errors propagate; the admission path must not treat an
    /// unreadable ledger as headroom.
    pub async fn is_exceeded(&self) -> Result<bool, StoreError> {
        if self.cap_micros <= 0 {
            return Ok(false);
        }

        let day = day_stamp(Utc::now());
        let spent = self
            .store
            .get(&keys::budget_cost(&day))
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        Ok(spent >= self.cap_micros)
    }

    /// Fold one completed generation's cost into today's ledger and fire
    /// threshold alerts when a boundary is crossed.
    pub async fn record_spend(&self, cost_micros: i64) -> Result<(), StoreError> {
        let day = day_stamp(Utc::now());
        let total = self
            .store
            .incr_by_ex(&keys::budget_cost(&day), cost_micros, keys::RETENTION_SECONDS)
            .await?;

        if self.cap_micros <= 0 {
            return Ok(());
        }

        if total >= self.cap_micros {
            self.alerter
                .notify_once(
                    &day,
                    AlertLevel::Critical,
                    &format!(
                        "Daily budget exhausted: {} spent of {} cap",
                        format_usd(total),
                        format_usd(self.cap_micros)
                    ),
                )
                .await;
        } else if total * 100 >= self.cap_micros * WARNING_THRESHOLD_PCT {
            self.alerter
                .notify_once(
                    &day,
                    AlertLevel::Warning,
                    &format!(
                        "Daily budget at {}%: {} spent of {} cap",
                        total * 100 / self.cap_micros,
                        format_usd(total),
                        format_usd(self.cap_micros)
                    ),
                )
                .await;
        }

        Ok(())
    }
}

fn format_usd(micros: i64) -> String {
    format!("${:.2}", micros as f64 / 1_000_000.0)
}

impl std::fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("cap_micros", &self.cap_micros)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use httpmock::{Method::POST, MockServer};

    fn tracker_with_hook(
        store: Arc<MemoryStore>,
        cap_micros: i64,
        hook_url: Option<String>,
    ) -> BudgetTracker {
        let alerter = Arc::new(Alerter::new(store.clone(), hook_url));
        BudgetTracker::new(store, cap_micros, alerter)
    }

    #[tokio::test]
    async fn test_exceeded_exactly_at_cap() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker_with_hook(store, 10_000_000, None);

        assert!(!tracker.is_exceeded().await.unwrap());

        tracker.record_spend(9_999_999).await.unwrap();
        assert!(!tracker.is_exceeded().await.unwrap());

        tracker.record_spend(1).await.unwrap();
        assert!(tracker.is_exceeded().await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_cap_disables_tracking() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker_with_hook(store, 0, None);

        tracker.record_spend(5_000_000).await.unwrap();
        assert!(!tracker.is_exceeded().await.unwrap());
    }

    #[tokio::test]
    async fn test_warning_fires_once_when_crossing_80_percent() {
        // Scenario: ledger at 79% of a $10 cap, one more $0.50 request
        // lands at 84% and fires a single warning; a repeat spend seconds
        // later does not re-fire it.
        let server = MockServer::start_async().await;
        let hook = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/hook")
                    .body_includes(r#""level":"warning""#);
                then.status(200);
            })
            .await;

        let store = Arc::new(MemoryStore::new());
        let tracker = tracker_with_hook(store, 10_000_000, Some(server.url("/hook")));

        tracker.record_spend(7_900_000).await.unwrap();
        hook.assert_hits_async(0).await;

        tracker.record_spend(500_000).await.unwrap();
        hook.assert_hits_async(1).await;

        tracker.record_spend(100_000).await.unwrap();
        hook.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_critical_fires_at_cap() {
        let server = MockServer::start_async().await;
        let critical = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/hook")
                    .body_includes(r#""level":"critical""#);
                then.status(200);
            })
            .await;

        let store = Arc::new(MemoryStore::new());
        let tracker = tracker_with_hook(store, 1_000_000, Some(server.url("/hook")));

        tracker.record_spend(1_200_000).await.unwrap();
        critical.assert_hits_async(1).await;
        assert!(tracker.is_exceeded().await.unwrap());
    }
}
