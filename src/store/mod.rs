//! Shared coordination store
//!
//! Gateway instances are stateless; every cross-request decision (quota
//! counters, budget ledger, analytics aggregates, sessions, OAuth state,
//! alert dedup) goes through the atomic primitives exposed here. The trait
//! is implemented by [`RedisStore`] for deployment and [`MemoryStore`] as a
//! single-process fallback for local development and tests.

pub mod keys;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors surfaced by the coordination store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o error: {0}")]
    Io(String),

    #[error("malformed record: {0}")]
    Corrupt(String),
}

/// Atomic key-value operations required by the gateway.
///
/// Counter operations are atomic: two concurrent `incr_by_ex` calls always
/// observe distinct counter values. TTLs are refreshed on every write, which
/// is idempotent for the fixed retention windows used here.
#[async_trait]
pub trait Store: Send + Sync {
    /// Connectivity probe for health reporting
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    /// Write-once set. Returns false when the key already existed.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64)
        -> Result<bool, StoreError>;

    /// Read and delete in one atomic step (consume-once semantics)
    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically increment a counter and refresh its TTL, returning the
    /// post-increment value.
    async fn incr_by_ex(&self, key: &str, delta: i64, ttl_seconds: u64)
        -> Result<i64, StoreError>;

    /// Pipelined counter increments sharing one TTL
    async fn incr_many_ex(
        &self,
        counters: &[(String, i64)],
        ttl_seconds: u64,
    ) -> Result<(), StoreError>;

    /// Increment a member's score in a sorted set and refresh the set's TTL
    async fn zincr_ex(
        &self,
        key: &str,
        member: &str,
        delta: i64,
        ttl_seconds: u64,
    ) -> Result<(), StoreError>;

    /// Highest-scored members of a sorted set, descending
    async fn ztop(&self, key: &str, count: usize) -> Result<Vec<(String, i64)>, StoreError>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Add a member to a set and refresh the set's TTL
    async fn sadd_ex(&self, key: &str, member: &str, ttl_seconds: u64) -> Result<(), StoreError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;
}
