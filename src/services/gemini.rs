//! Gemini backend adapter
//!
//! This module handles communication with the Google Gemini REST API and is
//! the only place upstream failures are classified. Classification is based
//! on typed HTTP status codes, never on error-message contents, and feeds
//! the credential pool's demotion policy.

use crate::config::UpstreamConfig;
use crate::schemas::gemini::{
    GeminiContent, GeminiError, GeminiRequest, GeminiResponse, GenerationConfig,
};
use crate::services::credential_pool::FailureKind;
use crate::utils::truncate_with_suffix;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Upstream error body excerpts are capped at this length in messages
const ERROR_EXCERPT_CHARS: usize = 200;

// ============================================================================
// Backend Contract
// ============================================================================

/// A single generation exchange, provider-agnostic
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Successful upstream response
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub text: String,
    pub model: String,
    pub finish_reason: Option<String>,
    /// Exact token counts when the upstream reports them
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Typed upstream failure carrying its classification
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("upstream rate limit: {0}")]
    RateLimited(String),

    #[error("upstream rejected credential: {0}")]
    Unauthorized(String),

    #[error("upstream rejected request: {0}")]
    Rejected(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream deadline of {seconds}s exceeded")]
    Timeout { seconds: u64 },
}

impl BackendError {
    /// Classification consumed by the credential pool and retry loop
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BackendError::RateLimited(_) => FailureKind::RateLimited,
            BackendError::Unauthorized(_) => FailureKind::Unauthorized,
            BackendError::Timeout { .. } => FailureKind::Timeout,
            BackendError::Rejected(_) | BackendError::Unavailable(_) => FailureKind::Other,
        }
    }
}

/// Abstraction over the generation upstream, so the dispatcher and tests
/// can run against scripted backends.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Model identifier served through this backend
    fn model(&self) -> &str;

    /// Perform one generation attempt with the given credential
    async fn generate(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> Result<BackendResponse, BackendError>;
}

// ============================================================================
// Gemini Implementation
// ============================================================================

/// REST adapter for the Gemini generateContent API
pub struct GeminiBackend {
    client: Client,
    model: String,
    base_url: String,
    timeout_seconds: u64,
}

impl GeminiBackend {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_API_BASE.to_string()),
            timeout_seconds: config.timeout_seconds,
        })
    }

    fn build_request(&self, request: &GenerationRequest) -> GeminiRequest {
        let generation_config = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens.map(|t| t as i32),
            })
        } else {
            None
        };

        GeminiRequest {
            contents: vec![GeminiContent::user(request.prompt.clone())],
            system_instruction: request
                .system_instruction
                .as_deref()
                .map(GeminiContent::system),
            generation_config,
        }
    }

    /// Map an upstream error status to its classified form
    fn classify_status(status: StatusCode, body: &str) -> BackendError {
        let message = match serde_json::from_str::<GeminiError>(body) {
            Ok(err) => err.error.message,
            Err(_) => truncate_with_suffix(body, ERROR_EXCERPT_CHARS, "..."),
        };

        match status {
            StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                BackendError::Unauthorized(message)
            }
            s if s.is_server_error() => BackendError::Unavailable(message),
            _ => BackendError::Rejected(message),
        }
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        api_key: &str,
        request: &GenerationRequest,
    ) -> Result<BackendResponse, BackendError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        tracing::debug!(model = %self.model, "Calling Gemini generateContent API");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout {
                        seconds: self.timeout_seconds,
                    }
                } else {
                    BackendError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::classify_status(status, &body));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse Gemini response");
            BackendError::Unavailable(format!("unparseable upstream response: {}", e))
        })?;

        let usage = parsed.usage_metadata.clone();
        Ok(BackendResponse {
            text: parsed.text(),
            model: parsed
                .model_version
                .clone()
                .unwrap_or_else(|| self.model.clone()),
            finish_reason: parsed.finish_reason().map(|s| s.to_string()),
            prompt_tokens: usage.as_ref().and_then(|u| u.prompt_token_count),
            completion_tokens: usage.as_ref().and_then(|u| u.candidates_token_count),
        })
    }
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
