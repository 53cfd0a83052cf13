//! Application state container
//!
//! This module defines the shared application state that is passed
//! to all request handlers via Axum's state extraction. Every service is
//! an owned, injected component: `new` wires the production store and
//! backend from settings, while `with_components` lets tests supply their
//! own.

use crate::auth::{GitHubOAuth, SessionManager};
use crate::config::Settings;
use crate::services::{
    Alerter, AnalyticsSink, BudgetTracker, CredentialPool, GeminiBackend, GenerationBackend,
    GenerationDispatcher, RateLimiter, UsageAnalytics,
};
use crate::store::{MemoryStore, RedisStore, Store};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::task::TaskTracker;

/// Shared application state
///
/// Cheaply cloneable; every field is an Arc or a lightweight handle.
#[derive(Clone)]
pub struct AppState {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Shared coordination store
    pub store: Arc<dyn Store>,

    /// Generation dispatcher (owns the credential pool)
    pub dispatcher: Arc<GenerationDispatcher>,

    /// Tiered daily quota enforcement
    pub rate_limiter: Arc<RateLimiter>,

    /// Aggregate spend tracking and threshold alerts
    pub budget: Arc<BudgetTracker>,

    /// Usage analytics aggregation
    pub analytics: Arc<UsageAnalytics>,

    /// Session mint/resolve/revoke
    pub sessions: Arc<SessionManager>,

    /// GitHub OAuth client, absent when not configured
    pub github: Option<Arc<GitHubOAuth>>,

    /// Fire-and-forget side-effect tasks, drained at shutdown
    pub tasks: TaskTracker,

    /// Application start time (for uptime calculation)
    pub start_time: Instant,
}

impl AppState {
    /// Build production state from settings
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = match &settings.store_url {
            Some(url) => {
                tracing::debug!("Connecting to shared coordination store");
                Arc::new(RedisStore::new(url)?)
            }
            None => {
                tracing::warn!(
                    "STORE_URL not set; using the in-process store. Quotas and sessions will not survive restarts or span instances."
                );
                Arc::new(MemoryStore::new())
            }
        };

        let backend: Arc<dyn GenerationBackend> =
            Arc::new(GeminiBackend::new(&settings.upstream)?);

        Self::with_components(settings, store, backend)
    }

    /// Wire the component graph around an injected store and backend
    pub fn with_components(
        settings: Settings,
        store: Arc<dyn Store>,
        backend: Arc<dyn GenerationBackend>,
    ) -> anyhow::Result<Self> {
        let settings = Arc::new(settings);
        let start_time = Instant::now();

        let pool = Arc::new(CredentialPool::from_secrets(
            settings.upstream.api_keys.clone(),
        ));
        if pool.is_empty() {
            tracing::warn!("No upstream credentials configured; generation requests will fail");
        } else {
            tracing::info!(credentials = pool.len(), "Credential pool initialized");
        }

        let dispatcher = Arc::new(GenerationDispatcher::new(
            backend,
            pool,
            Duration::from_secs(settings.upstream.timeout_seconds),
        ));

        let alerter = Arc::new(Alerter::new(
            store.clone(),
            settings.alert_webhook_url.clone(),
        ));
        let budget = Arc::new(BudgetTracker::new(
            store.clone(),
            settings.budget.cap_micros(),
            alerter,
        ));

        let rate_limiter = Arc::new(RateLimiter::new(store.clone(), settings.quota.clone()));

        let mut analytics = UsageAnalytics::new(store.clone());
        if let (Some(url), Some(key)) = (
            &settings.analytics_sink_url,
            &settings.analytics_sink_key,
        ) {
            tracing::info!("External analytics sink configured");
            analytics = analytics.with_sink(AnalyticsSink::new(url, key));
        }
        let analytics = Arc::new(analytics);
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            settings.session_ttl_days,
        ));

        let github = match (&settings.github_client_id, &settings.github_client_secret) {
            (Some(id), Some(secret)) => Some(Arc::new(GitHubOAuth::new(id, secret))),
            _ => {
                tracing::info!("GitHub OAuth not configured; auth endpoints disabled");
                None
            }
        };

        tracing::info!("Application state initialized");

        Ok(Self {
            settings,
            store,
            dispatcher,
            rate_limiter,
            budget,
            analytics,
            sessions,
            github,
            tasks: TaskTracker::new(),
            start_time,
        })
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Close the task tracker and wait for in-flight side effects.
    ///
    /// Tasks that already started are never cancelled; this only waits.
    pub async fn drain_background_tasks(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
