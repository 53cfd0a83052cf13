//! Authentication endpoints
//!
//! Web OAuth flow (GET /auth/github, GET /auth/callback), device flow for
//! non-browser callers (POST /api/auth/device, POST /api/auth/device/poll),
//! and session introspection/logout (GET|DELETE /api/auth/me).
//!
//! The web flow's CSRF state is consumed from the store exactly once; a
//! missing, reused, or expired state renders the error page and never
//! reaches token exchange.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::auth::{DevicePoll, GitHubOAuth, GitHubUser, OAuthError, SessionUser};
use crate::error::ApiError;
use crate::middleware::identity::bearer_token;
use crate::server::state::AppState;
use crate::store::keys;

// ============================================================================
// Web Flow
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    /// Where to send the user after login completes
    #[serde(default)]
    pub redirect: Option<String>,
}

/// GET /auth/github
pub async fn github_authorize(
    State(state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, ApiError> {
    let oauth = require_oauth(&state)?;

    let nonce = random_nonce();
    state
        .store
        .set_ex(
            &keys::oauth_state(&nonce),
            query.redirect.as_deref().unwrap_or("/"),
            keys::OAUTH_STATE_TTL_SECONDS,
        )
        .await
        .map_err(ApiError::store_unavailable)?;

    let url = oauth.authorize_redirect(&nonce, &state.settings.oauth_redirect_uri());

    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, url)],
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// GET /auth/callback
pub async fn github_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, Html<String>) {
    let Ok(oauth) = require_oauth(&state) else {
        return error_page("GitHub login is not configured on this server.");
    };

    if let Some(error) = query.error {
        let detail = query.error_description.unwrap_or(error);
        tracing::warn!(error = %detail, "OAuth callback returned provider error");
        return error_page(&format!("GitHub reported an error: {}", detail));
    }

    let Some(nonce) = query.state.filter(|s| !s.is_empty()) else {
        return error_page("Missing login state. Please start the login again.");
    };

    // Consume-once: a replayed or expired state dies here, before any
    // token exchange.
    match state.store.get_del(&keys::oauth_state(&nonce)).await {
        Ok(Some(_redirect)) => {}
        Ok(None) => {
            tracing::warn!("OAuth state missing or already consumed");
            return error_page("This login link has expired or was already used. Please start again.");
        }
        Err(err) => {
            tracing::error!(error = %err, "Store unavailable during OAuth callback");
            return error_page("The service is temporarily unavailable. Please try again shortly.");
        }
    }

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return error_page("Missing authorization code. Please start the login again.");
    };

    let access_token = match oauth
        .exchange_code(&code, &state.settings.oauth_redirect_uri())
        .await
    {
        Ok(token) => token,
        Err(err) => {
            tracing::warn!(error = %err, "OAuth code exchange failed");
            return error_page("GitHub did not accept the login. Please try again.");
        }
    };

    let user = match oauth.fetch_user(&access_token).await {
        Ok(user) => user,
        Err(err) => {
            tracing::warn!(error = %err, "Profile fetch failed after code exchange");
            return error_page("Could not load your GitHub profile. Please try again.");
        }
    };

    let session = match state
        .sessions
        .mint(session_user_from(&user), &access_token)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %err, "Failed to persist session");
            return error_page("The service is temporarily unavailable. Please try again shortly.");
        }
    };

    tracing::info!(user = %user.login, "Web login completed");
    success_page(&session.token, &user.login)
}

// ============================================================================
// Device Flow
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DeviceStartResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: u64,
}

/// POST /api/auth/device
pub async fn device_start(
    State(state): State<AppState>,
) -> Result<Json<DeviceStartResponse>, ApiError> {
    let oauth = require_oauth(&state)?;

    let grant = oauth.start_device_flow().await.map_err(provider_error)?;

    Ok(Json(DeviceStartResponse {
        device_code: grant.device_code,
        user_code: grant.user_code,
        verification_uri: grant.verification_uri,
        expires_in: grant.expires_in,
        interval: grant.interval,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DevicePollRequest {
    pub device_code: String,
}

#[derive(Debug, Serialize)]
pub struct DevicePollResponse {
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<DeviceUser>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeviceUser {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
}

/// POST /api/auth/device/poll
pub async fn device_poll(
    State(state): State<AppState>,
    payload: Result<Json<DevicePollRequest>, JsonRejection>,
) -> Result<Json<DevicePollResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidJson(e.body_text()))?;
    let oauth = require_oauth(&state)?;

    let poll = oauth
        .poll_device(&request.device_code)
        .await
        .map_err(provider_error)?;

    let response = match poll {
        DevicePoll::Pending => DevicePollResponse {
            status: "pending",
            token: None,
            user: None,
            error: None,
        },
        DevicePoll::Expired => DevicePollResponse {
            status: "expired",
            token: None,
            user: None,
            error: None,
        },
        DevicePoll::Denied => DevicePollResponse {
            status: "error",
            token: None,
            user: None,
            error: Some("authorization was denied".to_string()),
        },
        DevicePoll::Failed(message) => DevicePollResponse {
            status: "error",
            token: None,
            user: None,
            error: Some(message),
        },
        DevicePoll::Authorized(access_token) => {
            let user = oauth
                .fetch_user(&access_token)
                .await
                .map_err(provider_error)?;
            let session = state
                .sessions
                .mint(session_user_from(&user), &access_token)
                .await
                .map_err(ApiError::store_unavailable)?;

            tracing::info!(user = %user.login, "Device login completed");

            DevicePollResponse {
                status: "success",
                token: Some(session.token),
                user: Some(DeviceUser {
                    id: user.id.to_string(),
                    username: user.login,
                    name: user.name,
                }),
                error: None,
            }
        }
    };

    Ok(Json(response))
}

// ============================================================================
// Session Introspection & Logout
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub authenticated: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<MeSession>,
}

#[derive(Debug, Serialize)]
pub struct MeSession {
    pub created_at: String,
    pub expires_at: String,
}

/// GET /api/auth/me
///
/// Always 200; `authenticated` is false for absent and expired tokens
/// alike, so callers cannot probe which tokens ever existed.
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let Some(token) = bearer_token(&headers) else {
        return Ok(Json(unauthenticated()));
    };

    let session = state
        .sessions
        .resolve(token)
        .await
        .map_err(ApiError::store_unavailable)?;

    Ok(Json(match session {
        Some(session) => MeResponse {
            authenticated: true,
            user: Some(session.user.clone()),
            session: Some(MeSession {
                created_at: session.created_at.to_rfc3339(),
                expires_at: session.expires_at.to_rfc3339(),
            }),
        },
        None => unauthenticated(),
    }))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// DELETE /api/auth/me
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LogoutResponse>, ApiError> {
    let Some(token) = bearer_token(&headers) else {
        return Err(ApiError::Unauthorized("missing bearer token".into()));
    };

    let removed = state
        .sessions
        .revoke(token)
        .await
        .map_err(ApiError::store_unavailable)?;

    if !removed {
        return Err(ApiError::Unauthorized("no active session".into()));
    }

    Ok(Json(LogoutResponse { success: true }))
}

// ============================================================================
// Helpers
// ============================================================================

fn require_oauth(state: &AppState) -> Result<&GitHubOAuth, ApiError> {
    state
        .github
        .as_deref()
        .ok_or_else(|| ApiError::ConfigError("GitHub login is not configured".into()))
}

fn provider_error(err: OAuthError) -> ApiError {
    ApiError::Provider(err.to_string())
}

fn session_user_from(user: &GitHubUser) -> SessionUser {
    SessionUser {
        id: user.id.to_string(),
        username: user.login.clone(),
        name: user.name.clone(),
        email: user.email.clone(),
        avatar_url: user.avatar_url.clone(),
    }
}

fn unauthenticated() -> MeResponse {
    MeResponse {
        authenticated: false,
        user: None,
        session: None,
    }
}

/// Unguessable CSRF nonce
fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// HTML Pages
// ============================================================================

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Rocket CLI - Login Complete</title>
</head>
<body style="font-family: system-ui, sans-serif; max-width: 640px; margin: 4rem auto; padding: 0 1rem;">
  <h1>&#x2705; Login complete</h1>
  <p>You are signed in as <strong>{username}</strong>.</p>
  <p>Copy this session token into the Rocket CLI if it did not pick it up automatically:</p>
  <pre style="background: #f4f4f4; padding: 1rem; overflow-x: auto;"><code>{token}</code></pre>
  <p>You can close this window.</p>
</body>
</html>"#;

const ERROR_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Rocket CLI - Login Failed</title>
</head>
<body style="font-family: system-ui, sans-serif; max-width: 640px; margin: 4rem auto; padding: 0 1rem;">
  <h1>&#x274C; Login failed</h1>
  <p>{message}</p>
  <p>Run <code>rocket login</code> to try again.</p>
</body>
</html>"#;

fn success_page(token: &str, username: &str) -> (StatusCode, Html<String>) {
    (
        StatusCode::OK,
        Html(
            SUCCESS_PAGE
                .replace("{username}", username)
                .replace("{token}", token),
        ),
    )
}

fn error_page(message: &str) -> (StatusCode, Html<String>) {
    (
        StatusCode::BAD_REQUEST,
        Html(ERROR_PAGE.replace("{message}", message)),
    )
}
