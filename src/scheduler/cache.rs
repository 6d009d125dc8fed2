//! Bounded LRU cache of computed reply options

use std::collections::HashMap;
use tokio::sync::Mutex;

struct CacheEntry {
    options: Vec<String>,
    /// Monotonic use stamp; the smallest stamp is the eviction victim
    last_used: u64,
}

/// Least-recently-used map from request identifier to reply options.
///
/// Short-circuits a repeated completion call for a message whose view was
/// recreated (list recycling) after an answer was already obtained. Reads
/// count as uses for recency purposes.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                clock: 0,
            }),
            capacity,
        }
    }

    pub async fn put(&self, identifier: &str, options: Vec<String>) {
        let mut inner = self.inner.lock().await;
        inner.clock += 1;
        let stamp = inner.clock;
        inner.entries.insert(
            identifier.to_string(),
            CacheEntry {
                options,
                last_used: stamp,
            },
        );

        if inner.entries.len() > self.capacity {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(key) = victim {
                inner.entries.remove(&key);
            }
        }
    }

    pub async fn get(&self, identifier: &str) -> Option<Vec<String>> {
        let mut inner = self.inner.lock().await;
        inner.clock += 1;
        let stamp = inner.clock;
        inner.entries.get_mut(identifier).map(|entry| {
            entry.last_used = stamp;
            entry.options.clone()
        })
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(n: usize) -> Vec<String> {
        vec![format!("option {}", n)]
    }

    #[tokio::test]
    async fn test_capacity_bound_evicts_lru() {
        let cache = ResultCache::new(100);
        for i in 0..101 {
            cache.put(&format!("id-{}", i), options(i)).await;
        }

        assert_eq!(cache.len().await, 100);
        // id-0 was the least recently used
        assert!(cache.get("id-0").await.is_none());
        assert!(cache.get("id-1").await.is_some());
        assert!(cache.get("id-100").await.is_some());
    }

    #[tokio::test]
    async fn test_get_refreshes_recency() {
        let cache = ResultCache::new(3);
        cache.put("a", options(0)).await;
        cache.put("b", options(1)).await;
        cache.put("c", options(2)).await;

        // Touch "a" so "b" is now the eviction victim
        assert!(cache.get("a").await.is_some());
        cache.put("d", options(3)).await;

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
        assert!(cache.get("d").await.is_some());
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_entry() {
        let cache = ResultCache::new(2);
        cache.put("a", options(0)).await;
        cache.put("a", options(1)).await;

        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("a").await, Some(options(1)));
    }
}
