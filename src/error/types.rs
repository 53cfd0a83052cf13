//! API error types
//!
//! Every error response carries a stable machine-readable `code` distinct
//! from the HTTP status, so the CLI can branch programmatically, plus a
//! human-readable `error` string.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("Prompt too long: {length} chars (limit {limit})")]
    PromptTooLong { length: usize, limit: usize },

    #[error("Daily limit of {limit} requests reached")]
    RateLimitExceeded {
        limit: u32,
        retry_after_seconds: u64,
        reset_at: DateTime<Utc>,
    },

    #[error("Service daily budget exhausted, try again after the daily reset")]
    BudgetExceeded,

    #[error("Upstream capacity exhausted: {0}")]
    UpstreamRateLimit(String),

    #[error("Service misconfigured: {0}")]
    ConfigError(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("OAuth provider error: {0}")]
    Provider(String),
}

impl ApiError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::InvalidPrompt(_) => "INVALID_PROMPT",
            ApiError::PromptTooLong { .. } => "PROMPT_TOO_LONG",
            ApiError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            ApiError::BudgetExceeded => "BUDGET_EXCEEDED",
            ApiError::UpstreamRateLimit(_) => "UPSTREAM_RATE_LIMIT",
            ApiError::ConfigError(_) => "CONFIG_ERROR",
            ApiError::GenerationFailed(_) => "GENERATION_FAILED",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Provider(_) => "PROVIDER_ERROR",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson(_)
            | ApiError::InvalidPrompt(_)
            | ApiError::PromptTooLong { .. } => StatusCode::BAD_REQUEST,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BudgetExceeded
            | ApiError::UpstreamRateLimit(_)
            | ApiError::ConfigError(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::GenerationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Infrastructure failure on the admission path. Never converted into a
    /// silent allow; callers get a 503 they can retry.
    pub fn store_unavailable(err: impl std::fmt::Display) -> Self {
        ApiError::ConfigError(format!("coordination store unavailable: {}", err))
    }
}

/// JSON error body shared by all endpoints
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody::new(self.code(), self.to_string());

        let mut response = (status, Json(body)).into_response();

        // Quota rejections carry retry metadata so clients can back off
        // until the shared daily reset instead of hammering the proxy.
        if let ApiError::RateLimitExceeded {
            limit,
            retry_after_seconds,
            reset_at,
        } = &self
        {
            let headers = response.headers_mut();
            if let Ok(v) = retry_after_seconds.to_string().parse() {
                headers.insert("retry-after", v);
            }
            if let Ok(v) = limit.to_string().parse() {
                headers.insert("x-ratelimit-limit", v);
            }
            if let Ok(v) = "0".parse() {
                headers.insert("x-ratelimit-remaining", v);
            }
            if let Ok(v) = reset_at.timestamp().to_string().parse() {
                headers.insert("x-ratelimit-reset", v);
            }
        }

        response
    }
}
