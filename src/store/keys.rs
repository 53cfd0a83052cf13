//! Store key naming contract
//!
//! Every key the gateway writes is built here, so the layout stays in one
//! place. Day stamps are `YYYYMMDD` in UTC.

/// Namespace prefix for all gateway keys
pub const PREFIX: &str = "rocket";

/// Retention for daily ledgers and analytics aggregates
pub const RETENTION_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Unused OAuth states expire after this long
pub const OAUTH_STATE_TTL_SECONDS: u64 = 10 * 60;

/// Window during which a duplicate alert is suppressed
pub const ALERT_DEDUP_TTL_SECONDS: u64 = 60 * 60;

/// Per-identity daily quota counter
pub fn quota(tier: &str, identity: &str, day: &str) -> String {
    format!("{PREFIX}:quota:{tier}:{identity}:{day}")
}

/// Aggregate daily spend in micro-dollars
pub fn budget_cost(day: &str) -> String {
    format!("{PREFIX}:budget:{day}:cost")
}

pub fn usage_requests(day: &str) -> String {
    format!("{PREFIX}:usage:{day}:requests")
}

pub fn usage_tokens(day: &str) -> String {
    format!("{PREFIX}:usage:{day}:tokens")
}

pub fn usage_cost(day: &str) -> String {
    format!("{PREFIX}:usage:{day}:cost")
}

pub fn usage_tier(day: &str, tier: &str) -> String {
    format!("{PREFIX}:usage:{day}:tier:{tier}")
}

/// Sorted set scoring callers by request count ("top callers")
pub fn usage_callers(day: &str) -> String {
    format!("{PREFIX}:usage:{day}:callers")
}

pub fn session(token: &str) -> String {
    format!("{PREFIX}:session:{token}")
}

/// Reverse index from user id to live session tokens
pub fn user_sessions(user_id: &str) -> String {
    format!("{PREFIX}:user-sessions:{user_id}")
}

/// CSRF nonce for the web authorization flow, consumed exactly once
pub fn oauth_state(nonce: &str) -> String {
    format!("{PREFIX}:oauth-state:{nonce}")
}

/// Write-once marker deduplicating budget alerts
pub fn alert(day: &str, level: &str) -> String {
    format!("{PREFIX}:alert:{day}:{level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            quota("anonymous", "ip:abc123", "20260805"),
            "rocket:quota:anonymous:ip:abc123:20260805"
        );
        assert_eq!(budget_cost("20260805"), "rocket:budget:20260805:cost");
        assert_eq!(
            usage_tier("20260805", "authenticated"),
            "rocket:usage:20260805:tier:authenticated"
        );
        assert_eq!(session("tok"), "rocket:session:tok");
        assert_eq!(alert("20260805", "warning"), "rocket:alert:20260805:warning");
    }
}
