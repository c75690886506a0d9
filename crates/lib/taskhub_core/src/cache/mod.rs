//! Read-through response cache with tenant-scoped pattern invalidation.
//!
//! The cache is an optimization, never a correctness requirement: every
//! failure here is logged and swallowed. A failed read is a miss, a failed
//! write leaves the entry absent, a failed invalidation leaves stale entries
//! that expire on their TTL.

pub mod key;
pub mod memory;
pub mod redis;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

pub use key::{Audience, CacheKey};

use crate::models::resource::ResourceKind;
use crate::retry::Retryable;

/// Cache backend errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache pool error: {0}")]
    Pool(String),

    #[error("Cache command error: {0}")]
    Command(String),

    #[error("Cache call timed out after {0:?}")]
    Timeout(Duration),
}

impl Retryable for CacheError {
    fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Pool(_) | CacheError::Timeout(_))
    }
}

/// Key-value store with TTL-on-set and glob bulk delete.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Delete every key matching a Redis-style glob. Returns the count removed.
    async fn delete_matching(&self, pattern: &str) -> Result<usize, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// A response body together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBody {
    pub bytes: Vec<u8>,
    pub hit: bool,
}

/// Read-through cache over a shared backend.
///
/// Cheap to clone; every clone shares the same backend connection.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    op_timeout: Duration,
    default_ttl: Duration,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, op_timeout: Duration, default_ttl: Duration) -> Self {
        Self {
            backend,
            op_timeout,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        tokio::time::timeout(self.op_timeout, call)
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))?
    }

    /// Look up a key. Backend failures read as a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.bounded(self.backend.get(key)).await {
            Ok(Some(bytes)) => {
                debug!(key, "cache hit");
                Some(bytes)
            }
            Ok(None) => {
                debug!(key, "cache miss");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "cache get failed");
                None
            }
        }
    }

    /// Store a value. Returns whether the write succeeded.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> bool {
        match self.bounded(self.backend.set_ex(key, value, ttl)).await {
            Ok(()) => {
                debug!(key, ttl_secs = ttl.as_secs(), "cache set");
                true
            }
            Err(e) => {
                warn!(key, error = %e, "cache set failed");
                false
            }
        }
    }

    /// Delete all entries matching `pattern`. Returns the number removed,
    /// or zero when the backend failed.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        match self.bounded(self.backend.delete_matching(pattern)).await {
            Ok(removed) => {
                debug!(pattern, removed, "cache invalidated");
                removed
            }
            Err(e) => {
                warn!(pattern, error = %e, "cache invalidation failed");
                0
            }
        }
    }

    /// Drop every cached view in `tenant_id` affected by a change to `kind`.
    pub async fn invalidate_resource(&self, kind: ResourceKind, tenant_id: &str) -> usize {
        let mut removed = 0;
        for pattern in key::invalidation_patterns(kind, tenant_id) {
            removed += self.invalidate(&pattern).await;
        }
        removed
    }

    /// Serve `key` from cache, or run `produce` and cache its output.
    ///
    /// Producer errors propagate untouched and are never cached. A failed
    /// cache write does not affect the returned body.
    pub async fn read_through<F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        produce: F,
    ) -> Result<CachedBody, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
    {
        if let Some(bytes) = self.get(key.as_str()).await {
            return Ok(CachedBody { bytes, hit: true });
        }
        let bytes = produce().await?;
        self.set(key.as_str(), &bytes, ttl.unwrap_or(self.default_ttl))
            .await;
        Ok(CachedBody { bytes, hit: false })
    }
}
