//! Process-local cache backend with per-entry TTL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::key::glob_match;
use super::{CacheBackend, CacheError};

/// A cached entry with its expiry deadline.
#[derive(Clone, Debug)]
struct CachedEntry {
    data: Arc<Vec<u8>>,
    expires_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Single-instance cache backed by a `DashMap`.
///
/// Entries are replaced or deleted, never updated in place. Expired entries
/// are dropped lazily on read and on pattern deletes.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CachedEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| !e.is_expired())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let hit = self.entries.get(key).map(|e| e.clone());
        match hit {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.data.as_ref().clone())),
            Some(_) => {
                self.entries.remove_if(key, |_, e| e.is_expired());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                data: Arc::new(value.to_vec()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize, CacheError> {
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            if entry.is_expired() {
                return false;
            }
            if glob_match(pattern, key) {
                removed += 1;
                return false;
            }
            true
        });
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_none_for_missing_key() {
        let cache = MemoryCache::new();
        assert!(cache.get("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_replaces_previous_value() {
        let cache = MemoryCache::new();
        cache.set_ex("k", b"one", Duration::from_secs(5)).await.unwrap();
        cache.set_ex("k", b"two", Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_on_ttl() {
        let cache = MemoryCache::new();
        cache.set_ex("k", b"v", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.contains("k"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn delete_matching_counts_removed_keys() {
        let cache = MemoryCache::new();
        for key in ["cache:tenant:t1:all:/api/projects", "cache:tenant:t1:all:/api/tasks/1", "cache:tenant:t2:all:/api/projects"] {
            cache.set_ex(key, b"v", Duration::from_secs(60)).await.unwrap();
        }
        let removed = cache.delete_matching("cache:tenant:t1:*projects*").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 2);
    }
}
