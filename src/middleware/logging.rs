//! Request logging middleware
//!
//! This module provides middleware for logging HTTP requests and responses,
//! including request duration, status codes, and trace IDs for correlation.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use uuid::Uuid;

/// Header name for trace ID
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Header name for request ID (alias for trace ID)
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Extension type for storing trace ID in request extensions
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new trace ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the trace ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Middleware to log HTTP requests and responses
///
/// Generates or propagates a trace ID, logs request and response details,
/// and echoes the trace ID back in the response headers.
pub async fn log_request(request: Request, next: Next) -> Response<Body> {
    let start = Instant::now();

    let trace_id = extract_or_generate_trace_id(&request);

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    tracing::info!(
        trace_id = %trace_id,
        method = %method,
        path = %path,
        user_agent = %user_agent.as_deref().unwrap_or("-"),
        "Incoming request"
    );

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
    );

    let response = {
        let _guard = span.enter();
        next.run(request).await
    };

    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
    let status_code = response.status().as_u16();

    if response.status().is_server_error() {
        tracing::error!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            status = %status_code,
            duration_ms = %format!("{:.2}", duration_ms),
            "Server error"
        );
    } else if response.status().is_client_error() {
        tracing::warn!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            status = %status_code,
            duration_ms = %format!("{:.2}", duration_ms),
            "Client error"
        );
    } else {
        tracing::info!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            status = %status_code,
            duration_ms = %format!("{:.2}", duration_ms),
            "Request completed"
        );
    }

    let mut response = response;
    if let Ok(header_value) = HeaderValue::from_str(&trace_id.0) {
        response
            .headers_mut()
            .insert(TRACE_ID_HEADER, header_value.clone());
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Extract trace ID from request headers or generate a new one
fn extract_or_generate_trace_id(request: &Request) -> TraceId {
    for header_name in [TRACE_ID_HEADER, REQUEST_ID_HEADER] {
        if let Some(trace_id) = request
            .headers()
            .get(header_name)
            .and_then(|v| v.to_str().ok())
        {
            return TraceId(trace_id.to_string());
        }
    }

    TraceId::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_generation() {
        let trace_id = TraceId::new();
        assert!(!trace_id.0.is_empty());
        // UUID v4 format: xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx
        assert_eq!(trace_id.0.len(), 36);
    }

    #[test]
    fn test_trace_id_display() {
        let trace_id = TraceId("test-trace-id".to_string());
        assert_eq!(format!("{}", trace_id), "test-trace-id");
    }
}
