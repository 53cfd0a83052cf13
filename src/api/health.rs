//! Health check endpoint
//!
//! GET /health reports component health (store connectivity, credential
//! pool) for monitoring and load balancers, and optionally today's usage
//! metrics with `?metrics=true`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::server::state::AppState;
use crate::services::analytics::UsageMetrics;

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    #[serde(default)]
    pub metrics: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub environment: String,
    pub uptime_seconds: u64,
    pub components: Components,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<UsageMetrics>,
}

#[derive(Debug, Serialize)]
pub struct Components {
    pub store: &'static str,
    pub backend: BackendComponent,
}

#[derive(Debug, Serialize)]
pub struct BackendComponent {
    pub model: String,
    pub credentials: usize,
    pub healthy_credentials: usize,
}

/// GET /health
pub async fn health_check(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> (StatusCode, Json<HealthResponse>) {
    let store_up = state.store.ping().await.is_ok();

    let pool = state.dispatcher.pool();
    let total = pool.len();
    let healthy = pool.healthy_count();

    // Unhealthy: admission cannot work at all. Degraded: serving, but with
    // reduced failover headroom.
    let (status, http_status) = if !store_up || total == 0 {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    } else if healthy < total {
        ("degraded", StatusCode::OK)
    } else {
        ("healthy", StatusCode::OK)
    };

    if status != "healthy" {
        tracing::warn!(
            status = status,
            store_up = store_up,
            healthy_credentials = healthy,
            total_credentials = total,
            "Health check not fully healthy"
        );
    }

    let metrics = if query.metrics.as_deref() == Some("true") {
        match state.analytics.read_aggregate(Utc::now().date_naive()).await {
            Ok(metrics) => Some(metrics),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read metrics for health response");
                None
            }
        }
    } else {
        None
    };

    (
        http_status,
        Json(HealthResponse {
            status,
            version: state.settings.app_version.clone(),
            environment: state.settings.environment.to_string(),
            uptime_seconds: state.uptime_seconds(),
            components: Components {
                store: if store_up { "up" } else { "down" },
                backend: BackendComponent {
                    model: state.dispatcher.model().to_string(),
                    credentials: total,
                    healthy_credentials: healthy,
                },
            },
            metrics,
        }),
    )
}
