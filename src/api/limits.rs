//! Quota status endpoint
//!
//! GET /v1/limits answers "how much do I have left" without consuming a
//! unit, backing the CLI's limits display and upgrade hints.

use axum::{extract::State, Extension, Json};
use chrono::Utc;
use serde::Serialize;

use crate::middleware::identity::{CallerIdentity, Tier};
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct LimitsResponse {
    pub tier: Tier,
    pub limits: Limits,
    pub benefits: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Limits {
    pub daily: DailyQuota,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyQuota {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the shared daily reset
    pub reset: u64,
    /// Reset instant, RFC 3339
    pub reset_at: String,
}

/// GET /v1/limits
pub async fn limits(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
) -> Json<LimitsResponse> {
    // Advisory read; fails open inside the limiter if the store is down.
    let status = state.rate_limiter.status(&identity).await;
    let now = Utc::now();

    Json(LimitsResponse {
        tier: identity.tier,
        limits: Limits {
            daily: DailyQuota {
                limit: status.limit,
                remaining: status.remaining,
                reset: status.retry_after_seconds(now),
                reset_at: status.reset_at.to_rfc3339(),
            },
        },
        benefits: benefits_for(identity.tier, &state),
    })
}

fn benefits_for(tier: Tier, state: &AppState) -> Vec<String> {
    match tier {
        Tier::Anonymous => vec![
            format!(
                "Anonymous callers get {} requests per day",
                state.settings.quota.anonymous_daily_limit
            ),
            format!(
                "Log in with GitHub (rocket login) for {} requests per day",
                state.settings.quota.authenticated_daily_limit
            ),
        ],
        Tier::Authenticated => vec![
            format!(
                "Authenticated callers get {} requests per day",
                state.settings.quota.authenticated_daily_limit
            ),
            "Bring your own API key for unlimited usage".to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_quota_serialization() {
        let quota = DailyQuota {
            limit: 5,
            remaining: 3,
            reset: 7200,
            reset_at: "2026-08-06T00:00:00+00:00".to_string(),
        };

        let json = serde_json::to_value(&quota).unwrap();
        assert_eq!(json["limit"], 5);
        assert_eq!(json["remaining"], 3);
        assert_eq!(json["reset"], 7200);
        assert_eq!(json["resetAt"], "2026-08-06T00:00:00+00:00");
    }
}
