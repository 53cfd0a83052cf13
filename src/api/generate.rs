//! Generation endpoint
//!
//! POST /v1/generate is the admission pipeline end to end: validate the
//! request, consume caller quota, check the global budget, dispatch across
//! the credential pool, then record usage off the request path and return
//! the response with quota headers.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderValue},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::ApiError;
use crate::middleware::identity::CallerIdentity;
use crate::server::state::AppState;
use crate::services::analytics::UsageEvent;
use crate::services::dispatcher::{DispatchError, UsageEstimate};
use crate::services::gemini::GenerationRequest;

// ============================================================================
// Request / Response
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[validate(length(min = 1, message = "prompt must not be empty"))]
    pub prompt: String,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    pub system_instruction: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub text: String,
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    pub usage: GenerateUsage,
}

/// Token accounting plus the caller's quota snapshot, as the CLI expects
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub remaining: u32,
    pub limit: u32,
    /// Epoch seconds of the shared daily reset
    pub reset: i64,
}

// ============================================================================
// Handler
// ============================================================================

/// POST /v1/generate
pub async fn generate(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidJson(e.body_text()))?;

    request
        .validate()
        .map_err(|e| ApiError::InvalidPrompt(e.to_string()))?;
    if request.prompt.trim().is_empty() {
        return Err(ApiError::InvalidPrompt("prompt must not be empty".into()));
    }
    let prompt_chars = request.prompt.chars().count();
    if prompt_chars > state.settings.max_prompt_chars {
        return Err(ApiError::PromptTooLong {
            length: prompt_chars,
            limit: state.settings.max_prompt_chars,
        });
    }

    // Consume quota. A store failure here is a 503, never a silent allow.
    let decision = state
        .rate_limiter
        .admit(&identity)
        .await
        .map_err(ApiError::store_unavailable)?;
    if !decision.allowed {
        return Err(ApiError::RateLimitExceeded {
            limit: decision.limit,
            retry_after_seconds: decision.retry_after_seconds(Utc::now()),
            reset_at: decision.reset_at,
        });
    }

    // Global budget gate, distinct from the per-caller quota above.
    if state
        .budget
        .is_exceeded()
        .await
        .map_err(ApiError::store_unavailable)?
    {
        return Err(ApiError::BudgetExceeded);
    }

    let generation = state
        .dispatcher
        .generate(&GenerationRequest {
            prompt: request.prompt.clone(),
            system_instruction: request.system_instruction.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        })
        .await
        .map_err(map_dispatch_error)?;

    let estimate = UsageEstimate::for_exchange(
        &request.prompt,
        &generation,
        state.settings.budget.rate_micros_per_1k(),
    );

    // Record usage and spend off the request path. Failures are logged and
    // dropped; the caller already has their response.
    let analytics = state.analytics.clone();
    let budget = state.budget.clone();
    let event = UsageEvent {
        identity: identity.id.clone(),
        tier: identity.tier,
        tokens: estimate.total_tokens,
        cost_micros: estimate.cost_micros,
        credential: generation.credential.clone(),
    };
    state.tasks.spawn(async move {
        if let Err(err) = analytics.record(&event).await {
            tracing::warn!(error = %err, "Analytics write failed");
        }
        if let Err(err) = budget.record_spend(event.cost_micros).await {
            tracing::warn!(error = %err, "Budget ledger write failed");
        }
    });

    tracing::info!(
        identity = %identity.id,
        tier = %identity.tier,
        credential = %generation.credential,
        tokens = estimate.total_tokens,
        cost_micros = estimate.cost_micros,
        remaining = decision.remaining,
        "Generation completed"
    );

    let body = GenerateResponse {
        text: generation.text,
        model: generation.model,
        finish_reason: generation.finish_reason,
        usage: GenerateUsage {
            prompt_tokens: estimate.prompt_tokens,
            completion_tokens: estimate.completion_tokens,
            total_tokens: estimate.total_tokens,
            remaining: decision.remaining,
            limit: decision.limit,
            reset: decision.reset_at.timestamp(),
        },
    };

    Ok((quota_headers(&body.usage), Json(body)))
}

/// Rate-limit headers mirrored from the body for header-only clients
fn quota_headers(usage: &GenerateUsage) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in [
        ("x-ratelimit-limit", usage.limit.to_string()),
        ("x-ratelimit-remaining", usage.remaining.to_string()),
        ("x-ratelimit-reset", usage.reset.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    headers
}

fn map_dispatch_error(err: DispatchError) -> ApiError {
    match err {
        DispatchError::NoCredentials => {
            ApiError::ConfigError("no upstream credentials configured".into())
        }
        // Permanent upstream rejection: retrying would not help
        DispatchError::Upstream(e) => ApiError::GenerationFailed(e.to_string()),
        // Whole pool exhausted on transient failures
        DispatchError::Exhausted(e) => ApiError::UpstreamRateLimit(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gemini::BackendError;

    #[test]
    fn test_dispatch_error_mapping() {
        assert_eq!(
            map_dispatch_error(DispatchError::NoCredentials).code(),
            "CONFIG_ERROR"
        );
        assert_eq!(
            map_dispatch_error(DispatchError::Upstream(BackendError::Rejected(
                "bad".into()
            )))
            .code(),
            "GENERATION_FAILED"
        );
        assert_eq!(
            map_dispatch_error(DispatchError::Exhausted(BackendError::RateLimited(
                "quota".into()
            )))
            .code(),
            "UPSTREAM_RATE_LIMIT"
        );
    }

    #[test]
    fn test_usage_serializes_camel_case() {
        let usage = GenerateUsage {
            prompt_tokens: 10,
            completion_tokens: 20,
            total_tokens: 30,
            remaining: 4,
            limit: 5,
            reset: 1_770_000_000,
        };

        let json = serde_json::to_value(&usage).unwrap();
        assert_eq!(json["promptTokens"], 10);
        assert_eq!(json["completionTokens"], 20);
        assert_eq!(json["totalTokens"], 30);
        assert_eq!(json["remaining"], 4);
    }
}
