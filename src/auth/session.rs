//! Store-backed bearer sessions
//!
//! Sessions are minted at OAuth completion, read on every authenticated
//! request, and deleted on logout or lazily when an expiry check fails
//! before the store's TTL has evicted the record. An absent record and an
//! expired one are indistinguishable to callers, so token probing leaks
//! nothing.

use crate::store::{keys, Store, StoreError};
use crate::utils::truncate_with_suffix;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Profile fields captured from the OAuth provider at login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// An authenticated caller's proof of identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: SessionUser,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Upstream access token backing this session
    pub access_token: String,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Rate-limit identity for this session's user
    pub fn identity_id(&self) -> String {
        format!("github:{}", self.user.username)
    }
}

/// Mints, resolves, and revokes sessions in the shared store
pub struct SessionManager {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, ttl_days: i64) -> Self {
        Self {
            store,
            ttl: Duration::days(ttl_days.max(1)),
        }
    }

    /// Create a session for a freshly authenticated user
    pub async fn mint(
        &self,
        user: SessionUser,
        access_token: &str,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        let session = Session {
            token: generate_token(),
            user,
            created_at: now,
            expires_at: now + self.ttl,
            access_token: access_token.to_string(),
        };

        let record = serde_json::to_string(&session)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let ttl_seconds = self.ttl.num_seconds().max(1) as u64;

        self.store
            .set_ex(&keys::session(&session.token), &record, ttl_seconds)
            .await?;
        self.store
            .sadd_ex(
                &keys::user_sessions(&session.user.id),
                &session.token,
                ttl_seconds,
            )
            .await?;

        tracing::info!(
            user = %session.user.username,
            token = %truncate_with_suffix(&session.token, 8, "..."),
            "Session minted"
        );

        Ok(session)
    }

    /// Resolve a bearer token into a live session.
    ///
    /// Returns `None` for absent, expired, and unreadable records alike.
    pub async fn resolve(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let Some(record) = self.store.get(&keys::session(token)).await? else {
            return Ok(None);
        };

        let session: Session = match serde_json::from_str(&record) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = %err, "Dropping unreadable session record");
                self.store.del(&keys::session(token)).await.ok();
                return Ok(None);
            }
        };

        if session.is_expired(Utc::now()) {
            // Evict eagerly; the TTL would get there eventually.
            self.revoke(token).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Delete a session and drop it from the user's reverse index.
    /// Returns whether a record existed.
    pub async fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        let Some(record) = self.store.get_del(&keys::session(token)).await? else {
            return Ok(false);
        };

        if let Ok(session) = serde_json::from_str::<Session>(&record) {
            self.store
                .srem(&keys::user_sessions(&session.user.id), token)
                .await?;
        }

        Ok(true)
    }
}

/// 32 random bytes, hex-encoded: unguessable and URL-safe
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn user() -> SessionUser {
        SessionUser {
            id: "12345".to_string(),
            username: "octocat".to_string(),
            name: Some("The Octocat".to_string()),
            email: None,
            avatar_url: Some("https://avatars.example/u/12345".to_string()),
        }
    }

    #[tokio::test]
    async fn test_mint_then_resolve_round_trip() {
        let manager = SessionManager::new(Arc::new(MemoryStore::new()), 30);

        let minted = manager.mint(user(), "gho_upstream").await.unwrap();
        assert_eq!(minted.token.len(), 64);

        let resolved = manager.resolve(&minted.token).await.unwrap().unwrap();
        assert_eq!(resolved.user.username, "octocat");
        assert_eq!(resolved.identity_id(), "github:octocat");
        assert_eq!(resolved.access_token, "gho_upstream");
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let manager = SessionManager::new(Arc::new(MemoryStore::new()), 30);

        let a = manager.mint(user(), "t").await.unwrap();
        let b = manager.mint(user(), "t").await.unwrap();
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn test_unknown_token_resolves_to_none() {
        let manager = SessionManager::new(Arc::new(MemoryStore::new()), 30);
        assert!(manager.resolve("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_unauthenticated_before_ttl_eviction() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone(), 30);

        let minted = manager.mint(user(), "t").await.unwrap();

        // Rewrite the record as already expired; the store TTL is still far
        // in the future, so only the expiry check can reject it.
        let mut session = minted.clone();
        session.expires_at = Utc::now() - Duration::hours(1);
        store
            .set_ex(
                &keys::session(&minted.token),
                &serde_json::to_string(&session).unwrap(),
                3600,
            )
            .await
            .unwrap();

        assert!(manager.resolve(&minted.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_deletes_session() {
        let manager = SessionManager::new(Arc::new(MemoryStore::new()), 30);

        let minted = manager.mint(user(), "t").await.unwrap();
        assert!(manager.revoke(&minted.token).await.unwrap());
        assert!(manager.resolve(&minted.token).await.unwrap().is_none());

        // Second revoke finds nothing
        assert!(!manager.revoke(&minted.token).await.unwrap());
    }
}
