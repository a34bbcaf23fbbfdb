//! Cache backend implementations.

use crate::fingerprint::RequestFingerprint;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

struct StoredEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

impl StoredEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + ttl,
        }
    }
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Key-value storage for cached responses.
///
/// `compare_and_insert` writes only when the key is absent or expired and
/// reports whether it wrote. External stores implement it with their native
/// conditional put.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &RequestFingerprint) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &RequestFingerprint, value: &[u8], ttl: Duration) -> Result<()>;
    async fn compare_and_insert(
        &self,
        key: &RequestFingerprint,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool>;
    async fn delete(&self, key: &RequestFingerprint) -> Result<bool>;
    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
    async fn clear(&self) -> Result<()>;
    async fn len(&self) -> Result<usize>;
    fn name(&self) -> &'static str;
}

/// In-memory backend.
///
/// Reads use `peek`, so recency order equals write order and a bounded cache
/// evicts the oldest write when full.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, StoredEntry>>,
}

impl MemoryCache {
    /// Bounded cache; `max_entries == 0` means unbounded.
    pub fn new(max_entries: usize) -> Self {
        let lru = NonZeroUsize::new(max_entries)
            .map(LruCache::new)
            .unwrap_or_else(LruCache::unbounded);
        Self {
            entries: Mutex::new(lru),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, StoredEntry>>> {
        self.entries.lock().map_err(|_| {
            Error::storage_with_context(
                "memory cache poisoned",
                ErrorContext::new().with_source("memory_cache"),
            )
        })
    }

    fn purge_locked(entries: &mut LruCache<String, StoredEntry>, now: Instant) -> usize {
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            entries.pop(k);
        }
        expired.len()
    }

    fn insert_locked(
        entries: &mut LruCache<String, StoredEntry>,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) {
        if entries.len() >= entries.cap().get() && !entries.contains(key) {
            // Prefer dropping dead entries over evicting a live one.
            Self::purge_locked(entries, Instant::now());
        }
        entries.put(key.to_string(), StoredEntry::new(value.to_vec(), ttl));
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &RequestFingerprint) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        let expired = match entries.peek(key.as_str()) {
            None => return Ok(None),
            Some(e) => e.is_expired(Instant::now()),
        };
        if expired {
            entries.pop(key.as_str());
            return Ok(None);
        }
        Ok(entries.peek(key.as_str()).map(|e| e.data.clone()))
    }
    async fn set(&self, key: &RequestFingerprint, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self.lock()?;
        Self::insert_locked(&mut entries, key.as_str(), value, ttl);
        Ok(())
    }
    async fn compare_and_insert(
        &self,
        key: &RequestFingerprint,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool> {
        let mut entries = self.lock()?;
        let live = entries
            .peek(key.as_str())
            .map(|e| !e.is_expired(Instant::now()))
            .unwrap_or(false);
        if live {
            return Ok(false);
        }
        Self::insert_locked(&mut entries, key.as_str(), value, ttl);
        Ok(true)
    }
    async fn delete(&self, key: &RequestFingerprint) -> Result<bool> {
        Ok(self.lock()?.pop(key.as_str()).is_some())
    }
    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.lock()?;
        Ok(Self::purge_locked(&mut entries, Instant::now()))
    }
    async fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .count())
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}

pub struct NullCache;
impl NullCache {
    pub fn new() -> Self {
        Self
    }
}
impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &RequestFingerprint) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn set(&self, _: &RequestFingerprint, _: &[u8], _: Duration) -> Result<()> {
        Ok(())
    }
    async fn compare_and_insert(&self, _: &RequestFingerprint, _: &[u8], _: Duration) -> Result<bool> {
        Ok(false)
    }
    async fn delete(&self, _: &RequestFingerprint) -> Result<bool> {
        Ok(false)
    }
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> RequestFingerprint {
        RequestFingerprint::new(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_absent_and_evicted() {
        let cache = MemoryCache::unbounded();
        cache.set(&key("a"), b"one", Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get(&key("a")).await.unwrap().as_deref(), Some(&b"one"[..]));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.get(&key("a")).await.unwrap().is_none());
        assert_eq!(cache.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_bounded_evicts_oldest_write() {
        let cache = MemoryCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.set(&key("a"), b"1", ttl).await.unwrap();
        cache.set(&key("b"), b"2", ttl).await.unwrap();
        // Reads do not refresh recency.
        cache.get(&key("a")).await.unwrap();
        cache.set(&key("c"), b"3", ttl).await.unwrap();

        assert!(cache.get(&key("a")).await.unwrap().is_none());
        assert!(cache.get(&key("b")).await.unwrap().is_some());
        assert!(cache.get(&key("c")).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_prefers_dropping_expired() {
        let cache = MemoryCache::new(2);
        cache.set(&key("old"), b"1", Duration::from_secs(60)).await.unwrap();
        cache.set(&key("short"), b"2", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.set(&key("new"), b"3", Duration::from_secs(60)).await.unwrap();

        assert!(cache.get(&key("old")).await.unwrap().is_some());
        assert!(cache.get(&key("new")).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_and_insert() {
        let cache = MemoryCache::unbounded();
        let ttl = Duration::from_secs(5);
        assert!(cache.compare_and_insert(&key("k"), b"first", ttl).await.unwrap());
        assert!(!cache.compare_and_insert(&key("k"), b"second", ttl).await.unwrap());
        assert_eq!(cache.get(&key("k")).await.unwrap().as_deref(), Some(&b"first"[..]));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.compare_and_insert(&key("k"), b"third", ttl).await.unwrap());
        assert_eq!(cache.get(&key("k")).await.unwrap().as_deref(), Some(&b"third"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryCache::unbounded();
        cache.set(&key("a"), b"1", Duration::from_secs(1)).await.unwrap();
        cache.set(&key("b"), b"2", Duration::from_secs(100)).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_null_cache_stores_nothing() {
        let cache = NullCache::new();
        cache.set(&key("a"), b"1", Duration::from_secs(1)).await.unwrap();
        assert!(cache.get(&key("a")).await.unwrap().is_none());
        assert_eq!(cache.name(), "null");
    }
}
