//! GitHub OAuth client
//!
//! Implements the two GitHub flows the gateway exposes: the web
//! authorization-code flow (redirect + callback) and the device flow for
//! non-browser callers. Endpoint URLs are injectable so tests can point the
//! client at a local mock.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const GITHUB_API_BASE: &str = "https://api.github.com";

/// Scope requested from GitHub; profile read only
const OAUTH_SCOPE: &str = "read:user";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("github request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("github rejected the request: {0}")]
    Provider(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

// ============================================================================
// Wire Types
// ============================================================================

/// GitHub profile fields the gateway keeps
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Device-flow bootstrap data, relayed to the CLI verbatim
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeGrant {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
}

fn default_poll_interval() -> u64 {
    5
}

/// Outcome of one device-flow poll
#[derive(Debug, Clone)]
pub enum DevicePoll {
    /// User has not completed authorization yet (includes slow_down)
    Pending,
    /// Authorization completed; carries the upstream access token
    Authorized(String),
    /// The device code expired before the user finished
    Expired,
    /// The user denied the authorization
    Denied,
    /// Any other provider-reported error
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// GitHub OAuth application client
pub struct GitHubOAuth {
    client_id: String,
    client_secret: String,
    http: Client,
    authorize_url: String,
    token_url: String,
    device_code_url: String,
    api_base: String,
}

impl GitHubOAuth {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http,
            authorize_url: GITHUB_AUTHORIZE_URL.to_string(),
            token_url: GITHUB_TOKEN_URL.to_string(),
            device_code_url: GITHUB_DEVICE_CODE_URL.to_string(),
            api_base: GITHUB_API_BASE.to_string(),
        }
    }

    /// Override provider endpoints (tests, GitHub Enterprise)
    pub fn with_endpoints(
        mut self,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
        device_code_url: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        self.authorize_url = authorize_url.into();
        self.token_url = token_url.into();
        self.device_code_url = device_code_url.into();
        self.api_base = api_base.into();
        self
    }

    /// Authorization URL carrying the CSRF state for the web flow
    pub fn authorize_redirect(&self, state: &str, redirect_uri: &str) -> String {
        match reqwest::Url::parse_with_params(
            &self.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", OAUTH_SCOPE),
                ("state", state),
            ],
        ) {
            Ok(url) => url.to_string(),
            // The base URL is static configuration; this only trips on a
            // malformed endpoint override.
            Err(_) => self.authorize_url.clone(),
        }
    }

    /// Exchange a web-flow authorization code for an access token
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String, OAuthError> {
        let response: TokenResponse = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(OAuthError::Provider(
                response.error_description.unwrap_or(error),
            ));
        }
        response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OAuthError::Malformed("token response missing access_token".into()))
    }

    /// Begin the device flow; the caller relays the grant to the user
    pub async fn start_device_flow(&self) -> Result<DeviceCodeGrant, OAuthError> {
        let grant: DeviceCodeGrant = self
            .http
            .post(&self.device_code_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("scope", OAUTH_SCOPE),
            ])
            .send()
            .await?
            .json()
            .await?;

        Ok(grant)
    }

    /// One poll of the device-flow token endpoint
    pub async fn poll_device(&self, device_code: &str) -> Result<DevicePoll, OAuthError> {
        let response: TokenResponse = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("device_code", device_code),
                (
                    "grant_type",
                    "urn:ietf:params:oauth:grant-type:device_code",
                ),
            ])
            .send()
            .await?
            .json()
            .await?;

        if let Some(token) = response.access_token.filter(|t| !t.is_empty()) {
            return Ok(DevicePoll::Authorized(token));
        }

        Ok(match response.error.as_deref() {
            Some("authorization_pending") | Some("slow_down") => DevicePoll::Pending,
            Some("expired_token") => DevicePoll::Expired,
            Some("access_denied") => DevicePoll::Denied,
            Some(other) => DevicePoll::Failed(
                response
                    .error_description
                    .unwrap_or_else(|| other.to_string()),
            ),
            None => DevicePoll::Failed("provider returned neither token nor error".to_string()),
        })
    }

    /// Fetch the authenticated user's profile
    pub async fn fetch_user(&self, access_token: &str) -> Result<GitHubUser, OAuthError> {
        let response = self
            .http
            .get(format!("{}/user", self.api_base))
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", access_token))
            // GitHub rejects requests without a User-Agent
            .header("User-Agent", "rocket-community-proxy")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(OAuthError::Provider(format!(
                "profile fetch returned {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

impl std::fmt::Debug for GitHubOAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubOAuth")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
