//! Caller identity resolution
//!
//! Every tiered endpoint resolves the caller into a rate-limit identity
//! before any quota work. Precedence:
//!
//! 1. `Authorization: Bearer <token>` resolving to a live session
//! 2. `X-GitHub-User` set by a trusted pre-validating proxy
//! 3. Forwarded client IP, hashed (anonymous tier)
//!
//! A missing or expired session falls through rather than rejecting, so a
//! stale token degrades a caller to anonymous instead of locking them out.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::auth::SessionManager;
use crate::server::state::AppState;
use crate::utils::truncate_str;

/// Quota class of a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Anonymous,
    Authenticated,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The rate-limit and billing subject for one request
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    /// Opaque identity key: `github:<login>` or `ip:<hash>`
    pub id: String,
    pub tier: Tier,
}

impl CallerIdentity {
    pub fn anonymous(id: String) -> Self {
        Self {
            id,
            tier: Tier::Anonymous,
        }
    }

    pub fn authenticated(id: String) -> Self {
        Self {
            id,
            tier: Tier::Authenticated,
        }
    }
}

/// Middleware injecting a [`CallerIdentity`] into request extensions.
///
/// Never rejects: identity resolution failures degrade to the anonymous
/// tier, and the rate limiter takes it from there.
pub async fn resolve_identity(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let identity = identify(&state.sessions, request.headers()).await;

    tracing::debug!(
        identity = %identity.id,
        tier = %identity.tier,
        "Caller identity resolved"
    );

    request.extensions_mut().insert(identity);
    next.run(request).await
}

/// Resolve headers into an identity using the precedence chain
pub async fn identify(sessions: &SessionManager, headers: &HeaderMap) -> CallerIdentity {
    if let Some(token) = bearer_token(headers) {
        match sessions.resolve(token).await {
            Ok(Some(session)) => {
                return CallerIdentity::authenticated(session.identity_id());
            }
            Ok(None) => {
                // Absent and expired look the same; fall through.
            }
            Err(err) => {
                tracing::warn!(error = %err, "Session lookup failed, treating caller as anonymous");
            }
        }
    }

    if let Some(login) = headers
        .get("x-github-user")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return CallerIdentity::authenticated(format!("github:{}", login));
    }

    CallerIdentity::anonymous(format!("ip:{}", hash_ip(&client_ip(headers))))
}

/// Extract a bearer token from the Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Best-effort client address from forwarding headers
fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        // First hop is the original client
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Short stable hash of the client address; raw IPs never land in the store
fn hash_ip(ip: &str) -> String {
    let digest = Sha256::digest(ip.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    truncate_str(&hex, 16).to_string()
}
