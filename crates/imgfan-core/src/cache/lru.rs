//! Bounded LRU cache with in-flight load de-duplication.

use std::collections::HashMap;
use std::hash::Hash;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tracing::trace;

use crate::errors::AppResult;

type SharedLoad<V> = Shared<BoxFuture<'static, AppResult<V>>>;

struct Inner<K, V> {
    /// Values in access order: index 0 is the least recently used.
    map: IndexMap<K, V>,
    /// Loads in flight, shared so concurrent misses await one future.
    pending: HashMap<K, SharedLoad<V>>,
}

/// Bounded cache for per-item derived data (detail rows, thumbnails).
///
/// `get_with` loads on miss through the supplied loader and evicts the
/// least-recently-touched entry once size exceeds capacity. Access (hit or
/// fresh load) always moves the entry to the most-recently-used position.
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                map: IndexMap::new(),
                pending: HashMap::new(),
            }),
        }
    }

    /// Fetch a value, loading it on miss.
    ///
    /// Concurrent calls for the same missing key share a single load; the
    /// loader of the first caller wins.
    pub async fn get_with<F>(&self, key: K, loader: F) -> AppResult<V>
    where
        F: FnOnce() -> BoxFuture<'static, AppResult<V>>,
    {
        let load = {
            let mut inner = self.inner.lock().await;

            if let Some(value) = inner.map.get(&key).cloned() {
                self.touch(&mut inner, &key);
                return Ok(value);
            }

            if let Some(pending) = inner.pending.get(&key) {
                pending.clone()
            } else {
                trace!("lru cache miss, loading");
                let shared = loader().shared();
                inner.pending.insert(key.clone(), shared.clone());
                shared
            }
        };

        let result = load.await;

        let mut inner = self.inner.lock().await;
        inner.pending.remove(&key);
        if let Ok(ref value) = result {
            inner.map.insert(key.clone(), value.clone());
            self.touch(&mut inner, &key);
            while inner.map.len() > self.capacity {
                inner.map.shift_remove_index(0);
            }
        }
        result
    }

    /// Look up without loading; touches the entry on hit.
    pub async fn peek(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let value = inner.map.get(key).cloned()?;
        self.touch(&mut inner, key);
        Some(value)
    }

    /// Drop one entry.
    pub async fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().await.map.shift_remove(key)
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.inner.lock().await.map.clear();
    }

    /// Current number of cached entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.map.is_empty()
    }

    /// Keys in access order, least recently used first. Test hook.
    pub async fn keys(&self) -> Vec<K> {
        self.inner.lock().await.map.keys().cloned().collect()
    }

    fn touch(&self, inner: &mut Inner<K, V>, key: &K) {
        if let Some(index) = inner.map.get_index_of(key) {
            let last = inner.map.len() - 1;
            inner.map.move_index(index, last);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn fill(cache: &LruCache<u32, String>, keys: impl IntoIterator<Item = u32>) {
        for key in keys {
            cache
                .get_with(key, move || async move { Ok(format!("v{key}")) }.boxed())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_capacity_overflow_evicts_first_key() {
        let cache = LruCache::new(3);
        fill(&cache, [1, 2, 3, 4]).await;

        assert!(cache.peek(&1).await.is_none());
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn test_reaccess_protects_oldest_key() {
        let cache = LruCache::new(3);
        fill(&cache, [1, 2, 3]).await;

        // Touch 1; 2 becomes least-recently-used.
        cache.peek(&1).await.unwrap();
        fill(&cache, [4]).await;

        assert!(cache.peek(&2).await.is_none());
        assert!(cache.peek(&1).await.is_some());
    }

    #[tokio::test]
    async fn test_hit_moves_entry_to_mru() {
        let cache = LruCache::new(3);
        fill(&cache, [1, 2, 3]).await;
        cache.peek(&1).await.unwrap();

        assert_eq!(cache.keys().await, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_load() {
        let cache: Arc<LruCache<u32, u64>> = Arc::new(LruCache::new(8));
        let loads = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_with(99, move || {
                        async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                            Ok(7)
                        }
                        .boxed()
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
    async fn test_failed_load_is_not_cached() {
        let cache: LruCache<u32, u64> = LruCache::new(4);
        let result = cache
            .get_with(1, || {
                async { Err(crate::errors::AppError::network("down")) }.boxed()
            })
            .await;
        assert!(result.is_err());
        assert!(cache.peek(&1).await.is_none());

        // Next call loads again.
        let value = cache.get_with(1, || async { Ok(5) }.boxed()).await.unwrap();
        assert_eq!(value, 5);
    }
}
