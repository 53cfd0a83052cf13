//! Redis-backed coordination store
//!
//! Uses a multiplexed async connection; counter updates and their TTL
//! refreshes run in atomic (MULTI/EXEC) pipelines so concurrent instances
//! never observe a counter without its expiry.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{Store, StoreError};

/// Shared-store client for deployments with a reachable Redis endpoint
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Create a store from a `redis://` URL
    pub fn new(url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url.as_ref())
            .map_err(|e| StoreError::Io(format!("invalid store url: {}", e)))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(io_err)
    }
}

fn io_err(err: redis::RedisError) -> StoreError {
    StoreError::Io(err.to_string())
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(io_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(io_err)?;
        Ok(outcome.is_some())
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(io_err)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn incr_by_ex(
        &self,
        key: &str,
        delta: i64,
        ttl_seconds: u64,
    ) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        let (value, _): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(io_err)?;
        Ok(value)
    }

    async fn incr_many_ex(
        &self,
        counters: &[(String, i64)],
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        if counters.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, delta) in counters {
            pipe.cmd("INCRBY").arg(key).arg(*delta).ignore();
            pipe.cmd("EXPIRE").arg(key).arg(ttl_seconds).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(io_err)?;
        Ok(())
    }

    async fn zincr_ex(
        &self,
        key: &str,
        member: &str,
        delta: i64,
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("ZINCRBY")
            .arg(key)
            .arg(delta)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn ztop(&self, key: &str, count: usize) -> Result<Vec<(String, i64)>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(0)
            .arg(count as isize - 1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(io_err)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(io_err)
    }

    async fn sadd_ex(&self, key: &str, member: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(key)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(io_err)?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}
