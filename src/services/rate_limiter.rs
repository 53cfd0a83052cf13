//! Tiered daily rate limiting
//!
//! Quota accounting is a single atomic INCR against the shared store with a
//! compare-after-increment, so concurrent invocations across instances can
//! never both admit the last available unit. The window is a fixed UTC day;
//! every caller in a tier shares the same reset instant.
//!
//! Failure modes are asymmetric on purpose: the advisory `status` call
//! fails open (reports a full quota) when the store is unreachable, while
//! the consuming `admit` call propagates the store error so the request
//! path turns it into a 503 rather than silently allowing traffic past the
//! budget cap.

use crate::config::QuotaConfig;
use crate::middleware::identity::{CallerIdentity, Tier};
use crate::store::{keys, Store, StoreError};
use crate::utils::time::{day_stamp, next_utc_midnight, seconds_until_reset};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Quota keys outlive the window boundary by this much so a read racing the
/// reset still sees the old window rather than a missing key.
const WINDOW_TTL_GRACE_SECONDS: u64 = 60;

/// Outcome of a quota check
#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl QuotaDecision {
    /// Seconds until the shared daily reset
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_seconds().max(1) as u64
    }
}

/// Enforces per-tier daily caps
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn Store>,
    quota: QuotaConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, quota: QuotaConfig) -> Self {
        Self { store, quota }
    }

    /// Configured daily limit for a tier
    pub fn limit_for(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Anonymous => self.quota.anonymous_daily_limit,
            Tier::Authenticated => self.quota.authenticated_daily_limit,
        }
    }

    /// Consume one unit of quota for this identity.
    ///
    /// Store errors propagate: a failed increment must never read as an
    /// admission.
    pub async fn admit(&self, identity: &CallerIdentity) -> Result<QuotaDecision, StoreError> {
        let now = Utc::now();
        let key = keys::quota(identity.tier.as_str(), &identity.id, &day_stamp(now));
        let ttl = seconds_until_reset(now) + WINDOW_TTL_GRACE_SECONDS;

        let count = self.store.incr_by_ex(&key, 1, ttl).await?;
        let limit = self.limit_for(identity.tier);

        let decision = QuotaDecision {
            allowed: count <= i64::from(limit),
            limit,
            remaining: (i64::from(limit) - count).max(0) as u32,
            reset_at: next_utc_midnight(now),
        };

        if !decision.allowed {
            tracing::info!(
                identity = %identity.id,
                tier = %identity.tier,
                limit = limit,
                "Daily quota exhausted"
            );
        }

        Ok(decision)
    }

    /// Advisory quota snapshot; never consumes a unit.
    pub async fn status(&self, identity: &CallerIdentity) -> QuotaDecision {
        let now = Utc::now();
        let key = keys::quota(identity.tier.as_str(), &identity.id, &day_stamp(now));
        let limit = self.limit_for(identity.tier);

        let count = match self.store.get(&key).await {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0),
            Err(err) => {
                // Fail open: an advisory readout should not block callers.
                tracing::warn!(error = %err, "Store unreachable for quota status, reporting full limit");
                0
            }
        };

        QuotaDecision {
            allowed: count < i64::from(limit),
            limit,
            remaining: (i64::from(limit) - count).max(0) as u32,
            reset_at: next_utc_midnight(now),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn limiter() -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStore::new()),
            QuotaConfig {
                anonymous_daily_limit: 5,
                authenticated_daily_limit: 25,
            },
        )
    }

    fn anon() -> CallerIdentity {
        CallerIdentity::anonymous("ip:abc123".to_string())
    }

    #[tokio::test]
    async fn test_admitted_requests_count_down_to_zero() {
        let limiter = limiter();
        let identity = anon();

        let mut remaining = Vec::new();
        for _ in 0..5 {
            let decision = limiter.admit(&identity).await.unwrap();
            assert!(decision.allowed);
            remaining.push(decision.remaining);
        }
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let sixth = limiter.admit(&identity).await.unwrap();
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
    }

    #[tokio::test]
    async fn test_tiers_have_separate_limits() {
        let limiter = limiter();
        assert_eq!(limiter.limit_for(Tier::Anonymous), 5);
        assert_eq!(limiter.limit_for(Tier::Authenticated), 25);

        let authed = CallerIdentity::authenticated("github:octocat".to_string());
        let decision = limiter.admit(&authed).await.unwrap();
        assert_eq!(decision.limit, 25);
        assert_eq!(decision.remaining, 24);
    }

    #[tokio::test]
    async fn test_identities_do_not_share_windows() {
        let limiter = limiter();

        for _ in 0..5 {
            limiter
                .admit(&CallerIdentity::anonymous("ip:first".to_string()))
                .await
                .unwrap();
        }

        let other = limiter
            .admit(&CallerIdentity::anonymous("ip:second".to_string()))
            .await
            .unwrap();
        assert!(other.allowed);
        assert_eq!(other.remaining, 4);
    }

    #[tokio::test]
    async fn test_status_never_consumes() {
        let limiter = limiter();
        let identity = anon();

        limiter.admit(&identity).await.unwrap();

        // Repeated status reads report identical remaining values
        for _ in 0..10 {
            let status = limiter.status(&identity).await;
            assert!(status.allowed);
            assert_eq!(status.remaining, 4);
        }

        let decision = limiter.admit(&identity).await.unwrap();
        assert_eq!(decision.remaining, 3);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_never_exceed_limit() {
        let limiter = Arc::new(limiter());
        let identity = anon();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            let identity = identity.clone();
            handles.push(tokio::spawn(async move {
                limiter.admit(&identity).await.unwrap().allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_status_fails_open_when_store_is_down() {
        use crate::store::StoreError;
        use async_trait::async_trait;

        /// Store that refuses every operation
        struct DownStore;

        #[async_trait]
        impl Store for DownStore {
            async fn ping(&self) -> Result<(), StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn set_ex(&self, _: &str, _: &str, _: u64) -> Result<(), StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn set_nx_ex(&self, _: &str, _: &str, _: u64) -> Result<bool, StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn get_del(&self, _: &str) -> Result<Option<String>, StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn del(&self, _: &str) -> Result<(), StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn incr_by_ex(&self, _: &str, _: i64, _: u64) -> Result<i64, StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn incr_many_ex(&self, _: &[(String, i64)], _: u64) -> Result<(), StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn zincr_ex(&self, _: &str, _: &str, _: i64, _: u64) -> Result<(), StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn ztop(&self, _: &str, _: usize) -> Result<Vec<(String, i64)>, StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn mget(&self, _: &[String]) -> Result<Vec<Option<String>>, StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn sadd_ex(&self, _: &str, _: &str, _: u64) -> Result<(), StoreError> {
                Err(StoreError::Io("down".into()))
            }
            async fn srem(&self, _: &str, _: &str) -> Result<(), StoreError> {
                Err(StoreError::Io("down".into()))
            }
        }

        let limiter = RateLimiter::new(Arc::new(DownStore), QuotaConfig::default());
        let identity = anon();

        // Advisory path reports the nominal full limit
        let status = limiter.status(&identity).await;
        assert!(status.allowed);
        assert_eq!(status.remaining, status.limit);

        // Consuming path refuses to guess
        assert!(limiter.admit(&identity).await.is_err());
    }
}
