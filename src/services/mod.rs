//! Services module
//!
//! Contains the gateway's business logic: quota enforcement, credential
//! pooling, upstream dispatch, budget tracking, alerting, and analytics.

pub mod alerts;
pub mod analytics;
pub mod budget;
pub mod credential_pool;
pub mod dispatcher;
pub mod gemini;
pub mod rate_limiter;

pub use alerts::{AlertLevel, Alerter};
pub use analytics::{AnalyticsSink, CallerUsage, UsageAnalytics, UsageEvent, UsageMetrics};
pub use budget::BudgetTracker;
pub use credential_pool::{
    CredentialHealth, CredentialPool, CredentialStatus, FailureKind, SelectedCredential,
    UpstreamCredential,
};
pub use dispatcher::{DispatchError, Generation, GenerationDispatcher, UsageEstimate};
pub use gemini::{
    BackendError, BackendResponse, GeminiBackend, GenerationBackend, GenerationRequest,
};
pub use rate_limiter::{QuotaDecision, RateLimiter};
