//! Single-entry TTL cache.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::AppResult;
use crate::events::AppEvent;
use crate::ports::AppEventEmitter;

struct CacheEntry<T> {
    data: T,
    timestamp: Instant,
}

/// A single cached value keyed by a stable string, expiring after a fixed
/// duration.
///
/// The entry mutex is held across the loader call, so concurrent `get`s on
/// an empty or expired cache issue exactly one load; the others wait and
/// read the fresh entry.
pub struct TtlCache<T> {
    key: String,
    ttl: Duration,
    entry: Mutex<Option<CacheEntry<T>>>,
    emitter: Arc<dyn AppEventEmitter>,
}

impl<T: Clone> TtlCache<T> {
    /// Create an empty cache.
    pub fn new(key: impl Into<String>, ttl: Duration, emitter: Arc<dyn AppEventEmitter>) -> Self {
        Self {
            key: key.into(),
            ttl,
            entry: Mutex::new(None),
            emitter,
        }
    }

    /// The cache key used in invalidation broadcasts.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Return the cached value while fresh, otherwise reload through
    /// `loader`. `force_refresh` bypasses the freshness check.
    pub async fn get<F, Fut>(&self, force_refresh: bool, loader: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut entry = self.entry.lock().await;

        if !force_refresh {
            if let Some(cached) = entry.as_ref() {
                if cached.timestamp.elapsed() < self.ttl {
                    return Ok(cached.data.clone());
                }
            }
        }

        debug!(key = %self.key, "ttl cache reload");
        let data = loader().await?;
        *entry = Some(CacheEntry {
            data: data.clone(),
            timestamp: Instant::now(),
        });
        Ok(data)
    }

    /// Drop the entry and broadcast the invalidation to other windows.
    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
        self.emitter.emit(AppEvent::cache_invalidated(&self.key));
    }

    /// Drop the entry without broadcasting.
    ///
    /// Used when applying an invalidation that arrived from another
    /// window, where re-broadcasting would bounce forever.
    pub async fn invalidate_local(&self) {
        *self.entry.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{BroadcastEmitter, NoopEmitter};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache(ttl: Duration) -> TtlCache<u64> {
        TtlCache::new("stats", ttl, Arc::new(NoopEmitter::new()))
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_loader() {
        let cache = cache(Duration::from_secs(60));
        let loads = AtomicU32::new(0);

        for _ in 0..3 {
            let value = cache
                .get(false, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reloads() {
        let cache = cache(Duration::from_millis(10));
        cache.get(false, || async { Ok(1) }).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let value = cache.get(false, || async { Ok(2) }).await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_entry() {
        let cache = cache(Duration::from_secs(60));
        cache.get(false, || async { Ok(1) }).await.unwrap();
        let value = cache.get(true, || async { Ok(2) }).await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_concurrent_gets_load_once() {
        let cache = Arc::new(cache(Duration::from_secs(60)));
        let loads = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get(false, || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(7)
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 7);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_broadcasts() {
        let emitter = Arc::new(BroadcastEmitter::new(8));
        let cache: TtlCache<u64> =
            TtlCache::new("stats", Duration::from_secs(60), emitter.clone());
        let mut rx = emitter.subscribe();

        cache.invalidate().await;
        assert_eq!(
            rx.recv().await.unwrap(),
            AppEvent::cache_invalidated("stats")
        );
    }
}
