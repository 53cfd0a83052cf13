//! Application routing
//!
//! This module defines all HTTP routes for the application.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{auth, generate, health, limits};
use crate::middleware::{identity::resolve_identity, logging::log_request};
use crate::server::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // Health check route (no identity resolution required)
    let health_routes = Router::new().route("/health", get(health::health_check));

    // Tiered endpoints: identity resolution runs before the handlers
    let tiered_routes = Router::new()
        .route("/generate", post(generate::generate))
        .route("/limits", get(limits::limits))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            resolve_identity,
        ));

    // Web OAuth flow (browser-facing, HTML responses)
    let web_auth_routes = Router::new()
        .route("/github", get(auth::github_authorize))
        .route("/callback", get(auth::github_callback));

    // Device flow and session endpoints (CLI-facing, JSON)
    let auth_api_routes = Router::new()
        .route("/device", post(auth::device_start))
        .route("/device/poll", post(auth::device_poll))
        .route("/me", get(auth::me).delete(auth::logout));

    Router::new()
        .nest("/v1", tiered_routes)
        .nest("/auth", web_auth_routes)
        .nest("/api/auth", auth_api_routes)
        .merge(health_routes)
        // Layer order: first added = outermost = runs first
        .layer(create_cors_layer())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Create CORS layer with permissive settings
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            // Expose trace ID headers to clients
            "x-trace-id".parse().unwrap(),
            "x-request-id".parse().unwrap(),
            // Expose rate limit headers
            "x-ratelimit-limit".parse().unwrap(),
            "x-ratelimit-remaining".parse().unwrap(),
            "x-ratelimit-reset".parse().unwrap(),
            "retry-after".parse().unwrap(),
        ])
}

// ============================================================================
// End-to-End Tests
// ============================================================================
