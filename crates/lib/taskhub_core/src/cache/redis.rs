//! Redis cache backend over a `deadpool-redis` pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use tracing::info;

use super::{CacheBackend, CacheError};
use crate::retry::RetryPolicy;

/// Keys fetched per `SCAN` round trip during pattern deletes.
const SCAN_BATCH: usize = 500;

/// Build a connection pool whose waits, connects and recycles are all bounded
/// by `timeout`.
pub fn create_pool(url: &str, max_size: usize, timeout: Duration) -> Result<Pool, CacheError> {
    let mut pool_config = PoolConfig::new(max_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let mut config = Config::from_url(url);
    config.pool = Some(pool_config);
    config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| CacheError::Pool(e.to_string()))
}

/// Cache backed by a shared Redis pool.
///
/// Construct once per process with [`RedisCache::connect`] and share it; the
/// pool is the only state.
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the pool and verify the server answers `PING`, retrying
    /// connection failures per `retry`.
    pub async fn connect(
        url: &str,
        max_size: usize,
        timeout: Duration,
        retry: &RetryPolicy,
    ) -> Result<Self, CacheError> {
        let cache = Self::new(create_pool(url, max_size, timeout)?);
        retry.retry("redis cache connect", || cache.ping()).await?;
        info!("redis cache connected");
        Ok(cache)
    }

    /// Close the pool; in-flight connections finish, new checkouts fail.
    pub fn shutdown(&self) {
        self.pool.close();
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))
    }
}

fn command_error(e: redis::RedisError) -> CacheError {
    CacheError::Command(e.to_string())
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(command_error)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(command_error)
    }

    /// Cursor through `SCAN MATCH` rather than `KEYS` so a large keyspace
    /// never blocks the server.
    async fn delete_matching(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut removed = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;
            if !keys.is_empty() {
                let deleted: usize = conn.del(&keys).await.map_err(command_error)?;
                removed += deleted;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }
}
