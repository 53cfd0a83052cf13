//! Credential pool with recency-based selection
//!
//! Selection policy: among healthy credentials, pick the one with the
//! oldest last-use (never-used credentials sort first). This spreads load
//! evenly across the pool and avoids hot-keying a single credential. When
//! every credential is unhealthy, the oldest-used one is optimistically
//! re-marked healthy and handed out again, so a transient upstream outage
//! cannot wedge the gateway permanently.

use super::credential::{FailureKind, UpstreamCredential};
use serde::Serialize;

/// Name and secret of a selected credential, detached from pool state so
/// the caller holds no locks across the upstream call.
#[derive(Debug, Clone)]
pub struct SelectedCredential {
    pub name: String,
    pub secret: String,
}

/// Point-in-time view of one credential, for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub name: String,
    pub healthy: bool,
    pub request_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A pool of upstream credentials
#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<UpstreamCredential>,
}

impl CredentialPool {
    pub fn new(credentials: Vec<UpstreamCredential>) -> Self {
        Self { credentials }
    }

    /// Build a pool from named secrets, preserving configuration order
    pub fn from_secrets<I, N, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        Self::new(
            secrets
                .into_iter()
                .map(|(name, secret)| UpstreamCredential::new(name, secret))
                .collect(),
        )
    }

    /// Select a credential for the next upstream attempt.
    ///
    /// Returns `None` only when the pool is empty. The selected credential
    /// is stamped as used, so concurrent selections rotate instead of
    /// piling onto one key.
    pub fn select(&self) -> Option<SelectedCredential> {
        if self.credentials.is_empty() {
            return None;
        }

        let candidate = self
            .credentials
            .iter()
            .filter(|c| c.health().is_healthy())
            .min_by_key(|c| c.health().last_used());

        let selected = match candidate {
            Some(cred) => cred,
            None => {
                // Whole pool is unhealthy: self-healing retry with the one
                // that has rested longest.
                let cred = self
                    .credentials
                    .iter()
                    .min_by_key(|c| c.health().last_used())?;
                tracing::info!(
                    credential = cred.name(),
                    "All credentials unhealthy, optimistically retrying"
                );
                cred.health().set_healthy(true);
                cred
            }
        };

        selected.health().mark_used();
        Some(SelectedCredential {
            name: selected.name().to_string(),
            secret: selected.secret().to_string(),
        })
    }

    /// Record a successful request: the credential is healthy again
    pub fn report_success(&self, name: &str) {
        if let Some(cred) = self.find(name) {
            cred.health().set_healthy(true);
            cred.health().clear_error();
        }
    }

    /// Record a classified failure. Only rate-limit and auth failures
    /// demote the credential; anything else leaves health untouched since
    /// a different key would fail the same way.
    pub fn report_failure(&self, name: &str, kind: FailureKind, message: &str) {
        let Some(cred) = self.find(name) else {
            return;
        };
        cred.health().record_error(message);
        if kind.rotates() {
            cred.health().set_healthy(false);
            tracing::warn!(
                credential = name,
                reason = %kind,
                "Credential marked unhealthy"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.credentials
            .iter()
            .filter(|c| c.health().is_healthy())
            .count()
    }

    /// Point-in-time view of every credential
    pub fn snapshot(&self) -> Vec<CredentialStatus> {
        self.credentials
            .iter()
            .map(|c| CredentialStatus {
                name: c.name().to_string(),
                healthy: c.health().is_healthy(),
                request_count: c.health().request_count(),
                last_error: c.health().last_error(),
            })
            .collect()
    }

    fn find(&self, name: &str) -> Option<&UpstreamCredential> {
        self.credentials.iter().find(|c| c.name() == name)
    }
}
