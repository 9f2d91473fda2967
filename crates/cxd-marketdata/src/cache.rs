//! Bounded TTL cache for hot reads.
//!
//! Thread-safe, capped at `max_size`; inserting into a full cache evicts
//! the entry expiring soonest. Expired entries are dropped lazily on read.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Thread-safe TTL cache with a max size.
pub struct TtlCache<K, V> {
    max_size: usize,
    items: Mutex<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(max_size: usize) -> Self {
        debug_assert!(max_size > 0);
        Self {
            max_size,
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Live value for `key`, dropping it if expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut g = self.items.lock().unwrap();
        match g.get(key) {
            None => None,
            Some(entry) if entry.expires_at <= Instant::now() => {
                g.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
        }
    }

    /// Insert with a TTL. On overflow, the entry expiring soonest is
    /// evicted first.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut g = self.items.lock().unwrap();
        if g.len() >= self.max_size && !g.contains_key(&key) {
            if let Some(oldest) = g
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone())
            {
                g.remove(&oldest);
            }
        }
        g.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_read_as_absent() {
        let cache: TtlCache<&str, i32> = TtlCache::new(4);
        cache.set("a", 1, Duration::from_secs(60));
        cache.set("b", 2, Duration::ZERO);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        // The expired entry was dropped on read.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn overflow_evicts_the_soonest_to_expire() {
        let cache: TtlCache<&str, i32> = TtlCache::new(2);
        cache.set("long", 1, Duration::from_secs(600));
        cache.set("short", 2, Duration::from_secs(5));
        cache.set("new", 3, Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"short"), None, "earliest expiry must be evicted");
        assert_eq!(cache.get(&"long"), Some(1));
        assert_eq!(cache.get(&"new"), Some(3));
    }

    #[test]
    fn overwriting_a_key_does_not_evict_others() {
        let cache: TtlCache<&str, i32> = TtlCache::new(2);
        cache.set("a", 1, Duration::from_secs(60));
        cache.set("b", 2, Duration::from_secs(60));
        cache.set("a", 10, Duration::from_secs(60));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }
}
