//! Translation result cache.
//! `CacheStore` is the seam the pipeline talks to; `RedisCache` is the
//! shared backend, `MemoryCache` an in-process LRU used when no shared
//! store is configured. Entries live for `TRANSLATION_TTL`.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use super::TranslationResponse;

pub const TRANSLATION_TTL: Duration = Duration::from_secs(2 * 3600);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend: {0}")]
    Backend(String),
    #[error("cache serialization: {0}")]
    Serialization(String),
    #[error("cache operation aborted: {0}")]
    Aborted(String),
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<TranslationResponse>, CacheError>;

    /// Store `value` under `key` for `TRANSLATION_TTL`.
    async fn set(&self, key: &str, value: &TranslationResponse) -> Result<(), CacheError>;
}

struct CacheEntry {
    value: TranslationResponse,
    inserted_at: Instant,
}

/// In-process LRU with TTL. Not shared across processes.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<TranslationResponse>, CacheError> {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Ok(Some(entry.value.clone()));
            }
            // Expired
            cache.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &TranslationResponse) -> Result<(), CacheError> {
        let mut cache = self.inner.lock();
        cache.put(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> TranslationResponse {
        TranslationResponse::Text {
            translations: vec![s.to_string()],
        }
    }

    fn cache(capacity: usize) -> MemoryCache {
        MemoryCache::new(NonZeroUsize::new(capacity).unwrap(), TRANSLATION_TTL)
    }

    #[tokio::test]
    async fn get_after_set_hits() {
        let cache = cache(4);
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.set("k", &text("Hallo")).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(text("Hallo")));
    }

    #[tokio::test]
    async fn later_set_overwrites() {
        let cache = cache(4);
        cache.set("k", &text("one")).await.unwrap();
        cache.set("k", &text("two")).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(text("two")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = cache(4);
        cache.set("k", &text("Hallo")).await.unwrap();

        tokio::time::advance(TRANSLATION_TTL - Duration::from_secs(1)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn least_recently_used_is_evicted() {
        let cache = cache(2);
        cache.set("a", &text("a")).await.unwrap();
        cache.set("b", &text("b")).await.unwrap();
        cache.get("a").await.unwrap();
        cache.set("c", &text("c")).await.unwrap();
        assert!(cache.get("a").await.unwrap().is_some());
        assert!(cache.get("b").await.unwrap().is_none());
    }
}
