//! Credential types and health state

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

// ============================================================================
// Failure Classification
// ============================================================================

/// Classified reason for an upstream failure, produced by the backend
/// adapter from typed responses rather than error-message sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credential-specific quota or rate limit; another key may succeed
    RateLimited,
    /// Key rejected as invalid or unauthorized; another key may succeed
    Unauthorized,
    /// Deadline expired before the upstream answered; treated as a
    /// transient credential failure
    Timeout,
    /// Anything else; rotating keys will not help, surface immediately
    Other,
}

impl FailureKind {
    /// Whether this failure demotes the credential and justifies retrying
    /// the request with a different one.
    pub fn rotates(&self) -> bool {
        matches!(
            self,
            FailureKind::RateLimited | FailureKind::Unauthorized | FailureKind::Timeout
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::RateLimited => write!(f, "rate_limited"),
            FailureKind::Unauthorized => write!(f, "unauthorized"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Other => write!(f, "other"),
        }
    }
}

// ============================================================================
// Credential Health
// ============================================================================

/// Mutable health state for one credential
#[derive(Debug)]
pub struct CredentialHealth {
    healthy: AtomicBool,
    request_count: AtomicU64,
    last_used: Mutex<Option<Instant>>,
    last_error: Mutex<Option<String>>,
}

impl Default for CredentialHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialHealth {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            request_count: AtomicU64::new(0),
            last_used: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Stamp the credential as used now and bump its request counter
    pub fn mark_used(&self) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_used.lock() {
            *last = Some(Instant::now());
        }
    }

    pub fn last_used(&self) -> Option<Instant> {
        self.last_used.lock().ok().and_then(|guard| *guard)
    }

    pub fn record_error(&self, message: impl Into<String>) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(message.into());
        }
    }

    pub fn clear_error(&self) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = None;
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|guard| guard.clone())
    }
}

// ============================================================================
// Upstream Credential
// ============================================================================

/// One upstream API key with its health state
#[derive(Debug)]
pub struct UpstreamCredential {
    name: String,
    secret: String,
    health: CredentialHealth,
}

impl UpstreamCredential {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
            health: CredentialHealth::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn health(&self) -> &CredentialHealth {
        &self.health
    }
}
