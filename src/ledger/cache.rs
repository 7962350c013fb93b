//! Optional shared fingerprint cache.
//!
//! The cache mirrors the set of active fingerprints so that several processes
//! can share skip decisions. It is an accelerator only: every call is fallible
//! and the ledger logs and ignores failures.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{info, warn};

use super::error::CacheError;
use crate::fingerprint::Fingerprint;

/// Redis hash holding `fingerprint -> downloaded_at`.
pub const CACHE_NAMESPACE: &str = "tape-fetcher:fingerprints";

/// Key-value mirror of the active fingerprint set.
#[async_trait]
pub trait FingerprintCache: Send + Sync + fmt::Debug {
    /// Checks that the cache is reachable.
    async fn ping(&self) -> Result<(), CacheError>;

    /// Returns the recorded download timestamp for a fingerprint, if cached.
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<String>, CacheError>;

    /// Adds or refreshes a fingerprint.
    async fn insert(
        &self,
        fingerprint: &Fingerprint,
        downloaded_at: &str,
    ) -> Result<(), CacheError>;

    /// Removes a fingerprint.
    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), CacheError>;

    /// Removes every fingerprint in the namespace.
    async fn clear(&self) -> Result<(), CacheError>;
}

/// Redis-backed cache using a single hash key.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    key: String,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connects to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Redis`] if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key: CACHE_NAMESPACE.to_string(),
        })
    }
}

#[async_trait]
impl FingerprintCache for RedisCache {
    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(&self.key, fingerprint.as_str()).await?;
        Ok(value)
    }

    async fn insert(
        &self,
        fingerprint: &Fingerprint,
        downloaded_at: &str,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(&self.key, fingerprint.as_str(), downloaded_at)
            .await?;
        Ok(())
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(&self.key, fingerprint.as_str()).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&self.key).await?;
        Ok(())
    }
}

/// In-process cache, shareable between ledgers in the same process.
///
/// Availability can be toggled to exercise the degraded path.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<Fingerprint, String>,
    unavailable: AtomicBool,
}

impl MemoryCache {
    /// Creates an empty, available cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the cache reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of cached fingerprints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory cache disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl FingerprintCache for MemoryCache {
    async fn ping(&self) -> Result<(), CacheError> {
        self.check()
    }

    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.entries.get(fingerprint).map(|v| v.value().clone()))
    }

    async fn insert(
        &self,
        fingerprint: &Fingerprint,
        downloaded_at: &str,
    ) -> Result<(), CacheError> {
        self.check()?;
        self.entries.insert(fingerprint.clone(), downloaded_at.to_string());
        Ok(())
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), CacheError> {
        self.check()?;
        self.entries.remove(fingerprint);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.check()?;
        self.entries.clear();
        Ok(())
    }
}

/// Connects to a Redis cache, degrading to `None` on failure.
///
/// A failure is logged once here; the ledger then runs on the durable store
/// alone.
pub async fn connect_cache(url: &str) -> Option<Arc<dyn FingerprintCache>> {
    match RedisCache::connect(url).await {
        Ok(cache) => {
            info!(url, "shared fingerprint cache connected");
            Some(Arc::new(cache))
        }
        Err(error) => {
            warn!(url, error = %error, "shared fingerprint cache unavailable, using database only");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_insert_lookup_remove() {
        let cache = MemoryCache::new();
        let fp = Fingerprint::of_url("https://imgsrc.ru/a.webp");

        assert_eq!(cache.lookup(&fp).await.unwrap(), None);
        cache.insert(&fp, "2026-01-01 00:00:00").await.unwrap();
        assert_eq!(
            cache.lookup(&fp).await.unwrap().as_deref(),
            Some("2026-01-01 00:00:00")
        );
        cache.remove(&fp).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_memory_cache_unavailable_errors() {
        let cache = MemoryCache::new();
        cache.set_available(false);
        let fp = Fingerprint::of_url("https://imgsrc.ru/a.webp");
        assert!(matches!(cache.ping().await, Err(CacheError::Unavailable(_))));
        assert!(cache.insert(&fp, "t").await.is_err());
        cache.set_available(true);
        assert!(cache.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_cache_invalid_url_degrades() {
        assert!(connect_cache("not-a-redis-url").await.is_none());
    }
}
