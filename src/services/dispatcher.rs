//! Generation dispatcher
//!
//! Orchestrates one admitted request against the upstream: select a
//! credential, call the backend under the request deadline, and on a
//! classified-transient failure rotate to the next credential, up to a
//! fixed attempt budget. Permanent upstream errors are surfaced immediately
//! since retrying with a different key would fail identically and could
//! duplicate side effects.

use crate::services::credential_pool::CredentialPool;
use crate::services::gemini::{BackendError, GenerationBackend, GenerationRequest};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Attempts across the credential pool before giving up
const MAX_ATTEMPTS: usize = 3;

// ============================================================================
// Results
// ============================================================================

/// A completed generation, credited to the credential that produced it
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub credential: String,
    pub finish_reason: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Typed dispatch failure
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no upstream credentials configured")]
    NoCredentials,

    /// Non-retryable upstream error, surfaced from the failing attempt
    #[error(transparent)]
    Upstream(BackendError),

    /// Attempt budget exhausted; carries the last observed error
    #[error("credential pool exhausted: {0}")]
    Exhausted(BackendError),
}

// ============================================================================
// Usage Estimation
// ============================================================================

/// Token and cost accounting for one exchange.
///
/// When the upstream reports exact token counts those are used; otherwise
/// tokens are approximated as chars/4. The approximation is deliberate: it
/// keeps budget accounting identical across instances regardless of which
/// upstream responses carried usage metadata.
#[derive(Debug, Clone, Copy)]
pub struct UsageEstimate {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost_micros: i64,
}

impl UsageEstimate {
    pub fn for_exchange(prompt: &str, generation: &Generation, rate_micros_per_1k: i64) -> Self {
        let prompt_tokens = generation
            .prompt_tokens
            .unwrap_or_else(|| (prompt.chars().count() / 4) as u32);
        let completion_tokens = generation
            .completion_tokens
            .unwrap_or_else(|| (generation.text.chars().count() / 4) as u32);
        let total_tokens = prompt_tokens + completion_tokens;
        let cost_micros = i64::from(total_tokens) * rate_micros_per_1k / 1000;

        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cost_micros,
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Orchestrates generation attempts across the credential pool
pub struct GenerationDispatcher {
    backend: Arc<dyn GenerationBackend>,
    pool: Arc<CredentialPool>,
    deadline: Duration,
}

impl GenerationDispatcher {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        pool: Arc<CredentialPool>,
        deadline: Duration,
    ) -> Self {
        Self {
            backend,
            pool,
            deadline,
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Run one generation through the retry loop
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Generation, DispatchError> {
        if self.pool.is_empty() {
            return Err(DispatchError::NoCredentials);
        }

        let mut last_error: Option<BackendError> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let Some(credential) = self.pool.select() else {
                break;
            };

            let outcome = tokio::time::timeout(
                self.deadline,
                self.backend.generate(&credential.secret, request),
            )
            .await
            .unwrap_or_else(|_| {
                Err(BackendError::Timeout {
                    seconds: self.deadline.as_secs(),
                })
            });

            match outcome {
                Ok(response) => {
                    self.pool.report_success(&credential.name);
                    tracing::debug!(
                        credential = %credential.name,
                        attempt = attempt,
                        "Generation succeeded"
                    );
                    return Ok(Generation {
                        text: response.text,
                        model: response.model,
                        credential: credential.name,
                        finish_reason: response.finish_reason,
                        prompt_tokens: response.prompt_tokens,
                        completion_tokens: response.completion_tokens,
                    });
                }
                Err(err) => {
                    let kind = err.failure_kind();
                    self.pool
                        .report_failure(&credential.name, kind, &err.to_string());
                    tracing::warn!(
                        credential = %credential.name,
                        attempt = attempt,
                        kind = %kind,
                        error = %err,
                        "Upstream attempt failed"
                    );

                    if !kind.rotates() {
                        return Err(DispatchError::Upstream(err));
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(DispatchError::Exhausted(last_error.unwrap_or(
            BackendError::Unavailable("no attempts executed".to_string()),
        )))
    }
}

impl std::fmt::Debug for GenerationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationDispatcher")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gemini::BackendResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays a scripted sequence of outcomes
    struct ScriptedBackend {
        outcomes: Mutex<VecDeque<Result<BackendResponse, BackendError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(outcomes: Vec<Result<BackendResponse, BackendError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn model(&self) -> &str {
            "gemini-1.5-flash"
        }

        async fn generate(
            &self,
            api_key: &str,
            _request: &GenerationRequest,
        ) -> Result<BackendResponse, BackendError> {
            self.calls.lock().unwrap().push(api_key.to_string());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Unavailable("script empty".into())))
        }
    }

    fn ok_response(text: &str) -> Result<BackendResponse, BackendError> {
        Ok(BackendResponse {
            text: text.to_string(),
            model: "gemini-1.5-flash".to_string(),
            finish_reason: Some("STOP".to_string()),
            prompt_tokens: None,
            completion_tokens: None,
        })
    }

    fn pool() -> Arc<CredentialPool> {
        Arc::new(CredentialPool::from_secrets([
            ("primary", "key1"),
            ("fallback1", "key2"),
            ("fallback2", "key3"),
        ]))
    }

    fn dispatcher(
        backend: Arc<ScriptedBackend>,
        pool: Arc<CredentialPool>,
    ) -> GenerationDispatcher {
        GenerationDispatcher::new(backend, pool, Duration::from_secs(5))
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "hello".to_string(),
            system_instruction: None,
            temperature: None,
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn test_empty_pool_fails_fast() {
        let backend = Arc::new(ScriptedBackend::new(vec![ok_response("unused")]));
        let dispatcher = dispatcher(backend.clone(), Arc::new(CredentialPool::new(Vec::new())));

        let err = dispatcher.generate(&request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoCredentials));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_first_attempt_success_credits_credential() {
        let backend = Arc::new(ScriptedBackend::new(vec![ok_response("hi")]));
        let pool = pool();
        let dispatcher = dispatcher(backend, pool.clone());

        let generation = dispatcher.generate(&request()).await.unwrap();
        assert_eq!(generation.text, "hi");
        assert_eq!(generation.credential, "primary");
        assert_eq!(pool.healthy_count(), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_rotate_to_third_credential() {
        // Scenario: first two credentials hit their upstream quota, the
        // third succeeds and the response is credited to it.
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::RateLimited("quota".into())),
            Err(BackendError::RateLimited("quota".into())),
            ok_response("third time lucky"),
        ]));
        let pool = pool();
        let dispatcher = dispatcher(backend.clone(), pool.clone());

        let generation = dispatcher.generate(&request()).await.unwrap();

        assert_eq!(generation.text, "third time lucky");
        assert_eq!(generation.credential, "fallback2");
        assert_eq!(backend.calls(), vec!["key1", "key2", "key3"]);

        // First two are demoted, the third stays healthy
        let snapshot = pool.snapshot();
        assert!(!snapshot[0].healthy);
        assert!(!snapshot[1].healthy);
        assert!(snapshot[2].healthy);
    }

    #[tokio::test]
    async fn test_permanent_error_surfaces_without_rotation() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(BackendError::Rejected(
            "invalid request".into(),
        ))]));
        let pool = pool();
        let dispatcher = dispatcher(backend.clone(), pool.clone());

        let err = dispatcher.generate(&request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Upstream(_)));
        // Only one attempt was made and nothing was demoted
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(pool.healthy_count(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(BackendError::RateLimited("first".into())),
            Err(BackendError::RateLimited("second".into())),
            Err(BackendError::Unauthorized("third".into())),
        ]));
        let dispatcher = dispatcher(backend.clone(), pool());

        let err = dispatcher.generate(&request()).await.unwrap_err();
        match err {
            DispatchError::Exhausted(BackendError::Unauthorized(msg)) => {
                assert_eq!(msg, "third")
            }
            other => panic!("expected exhaustion with last error, got {:?}", other),
        }
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_slow_upstream_hits_deadline_and_rotates() {
        struct StallingBackend;

        #[async_trait]
        impl GenerationBackend for StallingBackend {
            fn model(&self) -> &str {
                "gemini-1.5-flash"
            }

            async fn generate(
                &self,
                _api_key: &str,
                _request: &GenerationRequest,
            ) -> Result<BackendResponse, BackendError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(BackendError::Unavailable("unreachable".into()))
            }
        }

        let pool = pool();
        let dispatcher = GenerationDispatcher::new(
            Arc::new(StallingBackend),
            pool.clone(),
            Duration::from_millis(10),
        );

        let err = dispatcher.generate(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Exhausted(BackendError::Timeout { .. })
        ));
        // Timeouts are transient credential failures: all three were tried
        assert_eq!(pool.snapshot().iter().filter(|s| !s.healthy).count(), 3);
    }

    #[test]
    fn test_usage_estimate_approximates_from_chars() {
        let generation = Generation {
            text: "x".repeat(400),
            model: "gemini-1.5-flash".to_string(),
            credential: "primary".to_string(),
            finish_reason: None,
            prompt_tokens: None,
            completion_tokens: None,
        };
        let prompt = "y".repeat(200);

        // 200/4 + 400/4 = 150 tokens; at 1000 micros per 1K -> 150 micros
        let estimate = UsageEstimate::for_exchange(&prompt, &generation, 1_000);
        assert_eq!(estimate.prompt_tokens, 50);
        assert_eq!(estimate.completion_tokens, 100);
        assert_eq!(estimate.total_tokens, 150);
        assert_eq!(estimate.cost_micros, 150);
    }

    #[test]
    fn test_usage_estimate_prefers_exact_counts() {
        let generation = Generation {
            text: "short".to_string(),
            model: "gemini-1.5-flash".to_string(),
            credential: "primary".to_string(),
            finish_reason: None,
            prompt_tokens: Some(1_000),
            completion_tokens: Some(500),
        };

        let estimate = UsageEstimate::for_exchange("prompt", &generation, 1_000);
        assert_eq!(estimate.total_tokens, 1_500);
        assert_eq!(estimate.cost_micros, 1_500);
    }
}
