//! TTL Read Cache
//!
//! Cache-aside memoization of loaded values, keyed by path. An entry is
//! served while its age is below the caller's TTL; otherwise the loader runs
//! and its result replaces the entry.
//!
//! There is no single-flight: callers racing past an expired entry each run
//! the loader. The lock is never held across the loader's await.

use crate::clock::{Clock, Timestamp};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    loaded_at: Timestamp,
}

/// Counters for cache behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Loader invocations that completed successfully
    pub loads: u64,
}

pub struct ReadCache<V: Clone, C: Clock> {
    clock: C,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
}

impl<V: Clone, C: Clock> ReadCache<V, C> {
    pub fn new(clock: C) -> Self {
        ReadCache {
            clock,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    /// Cached value for `key` if younger than `ttl`
    pub fn get(&self, key: &str, ttl: Duration) -> Option<V> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        if self.clock.elapsed(entry.loaded_at) < ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Serve `key` from the cache, or run `loader` and remember its result.
    ///
    /// Loader errors are returned as-is and leave any stale entry in place.
    pub async fn get_or_load<F, Fut, E>(&self, key: &str, ttl: Duration, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key, ttl) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "cache hit");
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "cache miss");

        let value = loader().await?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn insert(&self, key: &str, value: V) {
        let loaded_at = self.clock.now();
        self.entries
            .lock()
            .insert(key.to_string(), CacheEntry { value, loaded_at });
    }

    pub fn invalidate(&self, key: &str) {
        if self.entries.lock().remove(key).is_some() {
            debug!(key, "cache entry invalidated");
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let clock = ManualClock::new(0);
        let cache: ReadCache<u32, _> = ReadCache::new(clock.clone());

        let v: Result<u32, ()> = cache.get_or_load("k", TTL, || async { Ok(1) }).await;
        assert_eq!(v, Ok(1));

        clock.advance(Duration::from_secs(299));
        let v: Result<u32, ()> = cache.get_or_load("k", TTL, || async { Ok(2) }).await;
        assert_eq!(v, Ok(1));

        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                loads: 1
            }
        );
    }

    #[tokio::test]
    async fn test_reload_at_ttl() {
        let clock = ManualClock::new(0);
        let cache: ReadCache<u32, _> = ReadCache::new(clock.clone());

        let _: Result<u32, ()> = cache.get_or_load("k", TTL, || async { Ok(1) }).await;
        clock.advance(TTL);
        let v: Result<u32, ()> = cache.get_or_load("k", TTL, || async { Ok(2) }).await;
        assert_eq!(v, Ok(2));
        assert_eq!(cache.stats().loads, 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_loads() {
        let cache: ReadCache<u32, _> = ReadCache::new(ManualClock::new(0));
        for i in 0..3 {
            let v: Result<u32, ()> = cache
                .get_or_load("k", Duration::ZERO, || async move { Ok(i) })
                .await;
            assert_eq!(v, Ok(i));
        }
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test]
    async fn test_loader_error_keeps_nothing() {
        let cache: ReadCache<u32, _> = ReadCache::new(ManualClock::new(0));
        let v = cache.get_or_load("k", TTL, || async { Err("down") }).await;
        assert_eq!(v, Err("down"));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().loads, 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let cache: ReadCache<u32, _> = ReadCache::new(ManualClock::new(0));
        let _: Result<u32, ()> = cache.get_or_load("k", TTL, || async { Ok(1) }).await;
        cache.invalidate("k");
        let v: Result<u32, ()> = cache.get_or_load("k", TTL, || async { Ok(2) }).await;
        assert_eq!(v, Ok(2));
    }

    #[tokio::test]
    async fn test_no_single_flight() {
        let cache: Arc<ReadCache<u32, ManualClock>> = Arc::new(ReadCache::new(ManualClock::new(0)));
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        type Shared = Arc<ReadCache<u32, ManualClock>>;
        let load = |cache: Shared, barrier: Arc<tokio::sync::Barrier>| async move {
            cache
                .get_or_load("k", TTL, || async move {
                    // Both callers are past the cache check before either stores
                    barrier.wait().await;
                    Ok::<u32, ()>(7)
                })
                .await
        };

        let (a, b) = tokio::join!(
            load(Arc::clone(&cache), Arc::clone(&barrier)),
            load(Arc::clone(&cache), Arc::clone(&barrier))
        );
        assert_eq!(a, Ok(7));
        assert_eq!(b, Ok(7));
        assert_eq!(cache.stats().loads, 2);
        assert_eq!(cache.stats().misses, 2);
    }
}
