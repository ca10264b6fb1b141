use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Small time-to-live cache. Values are stored behind `Arc` and replaced as a
/// unit, so readers always see either the previous or the new value.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (Instant, Arc<V>)>>,
}

impl<K: Eq + Hash + Clone, V> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Returns the cached value if it has not expired.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        if !self.is_enabled() {
            return None;
        }
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, value)| Arc::clone(value))
    }

    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        if self.is_enabled() {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
            entries.insert(key, (Instant::now(), Arc::clone(&value)));
        }
        value
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_fresh_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("base", vec![1, 2, 3]);
        assert_eq!(*cache.get(&"base").unwrap(), vec![1, 2, 3]);
        assert!(cache.get(&"town").is_none());
    }

    #[test]
    fn test_expired_value_is_not_served() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.insert("base", 1);
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get(&"base").is_none());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = TtlCache::new(Duration::ZERO);
        let value = cache.insert("k", 5);
        assert_eq!(*value, 5);
        assert!(cache.get(&"k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_replaces_whole_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let first = cache.insert((), String::from("old"));
        cache.insert((), String::from("new"));
        assert_eq!(first.as_str(), "old");
        assert_eq!(cache.get(&()).unwrap().as_str(), "new");
    }
}
