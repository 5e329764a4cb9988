//! LRU cache bounded by item count and total byte size.
//!
//! Uses a BTreeMap recency index keyed by a monotonic logical tick,
//! allowing O(log n) LRU eviction without scanning the whole cache.
//! Ticks are unique, so each index slot holds exactly one key.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

/// One cached value with its access bookkeeping
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    size_bytes: u64,
    access_count: u64,
    last_accessed: u64,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub items: usize,
    pub total_bytes: u64,
    pub max_items: usize,
    pub max_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

pub struct BoundedCache<T> {
    entries: HashMap<String, CacheEntry<T>>,

    // Recency index: logical tick -> key
    recency: BTreeMap<u64, String>,

    tick: u64,
    total_bytes: u64,
    max_items: usize,
    max_bytes: u64,

    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<T> BoundedCache<T> {
    pub fn new(max_items: usize, max_bytes: u64) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            total_bytes: 0,
            max_items,
            max_bytes,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Get a value, refreshing its recency
    pub fn get(&mut self, key: &str) -> Option<&T> {
        let old_tick = match self.entries.get_mut(key) {
            Some(entry) => {
                let old = entry.last_accessed;
                entry.access_count += 1;
                old
            }
            None => {
                self.misses += 1;
                return None;
            }
        };

        self.hits += 1;
        self.recency.remove(&old_tick);
        let tick = self.next_tick();
        self.recency.insert(tick, key.to_string());
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_accessed = tick;
        }

        self.entries.get(key).map(|e| &e.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a value, evicting LRU entries until both bounds hold.
    ///
    /// A value larger than the byte budget on its own is rejected and
    /// evicts nothing; returns false in that case.
    pub fn set(&mut self, key: &str, value: T, size_bytes: u64) -> bool {
        if size_bytes > self.max_bytes {
            debug!(
                key,
                size_bytes, max_bytes = self.max_bytes, "Rejecting oversized cache entry"
            );
            return false;
        }

        // Replace-in-place counts as a fresh entry
        self.remove_entry(key);

        while !self.entries.is_empty()
            && (self.entries.len() + 1 > self.max_items
                || self.total_bytes + size_bytes > self.max_bytes)
        {
            self.evict_lru();
        }

        let tick = self.next_tick();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                size_bytes,
                access_count: 0,
                last_accessed: tick,
            },
        );
        self.recency.insert(tick, key.to_string());
        self.total_bytes += size_bytes;
        true
    }

    /// Remove a key. Not counted as an eviction.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        if let Some(entry) = self.entries.remove(key) {
            self.total_bytes -= entry.size_bytes;
            self.recency.remove(&entry.last_accessed);
            true
        } else {
            false
        }
    }

    fn evict_lru(&mut self) {
        if let Some((&oldest_tick, _)) = self.recency.iter().next() {
            if let Some(key) = self.recency.remove(&oldest_tick) {
                if let Some(entry) = self.entries.remove(&key) {
                    self.total_bytes -= entry.size_bytes;
                    self.evictions += 1;
                    debug!(key, "Evicted LRU cache entry");
                }
            }
        }
    }

    /// Bulk insert (startup warming). Oversized values are skipped.
    pub fn warm(&mut self, entries: Vec<(String, T, u64)>) -> usize {
        let mut loaded = 0;
        for (key, value, size_bytes) in entries {
            if self.set(&key, value, size_bytes) {
                loaded += 1;
            }
        }
        loaded
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let accesses = self.hits + self.misses;
        CacheStats {
            items: self.entries.len(),
            total_bytes: self.total_bytes,
            max_items: self.max_items,
            max_bytes: self.max_bytes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate: if accesses == 0 {
                0.0
            } else {
                self.hits as f64 / accesses as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_refreshes_recency() {
        let mut cache: BoundedCache<String> = BoundedCache::new(2, 1024);
        cache.set("a", "alpha".to_string(), 5);
        cache.set("b", "beta".to_string(), 4);

        // Touch A so B becomes least recently used
        assert_eq!(cache.get("a").map(String::as_str), Some("alpha"));

        cache.set("c", "gamma".to_string(), 5);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_byte_budget_enforced() {
        let mut cache: BoundedCache<Vec<u8>> = BoundedCache::new(100, 100);
        cache.set("a", vec![0; 60], 60);
        cache.set("b", vec![0; 50], 50);

        assert!(cache.total_bytes() <= 100);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_single_item_capacity() {
        let mut cache: BoundedCache<u32> = BoundedCache::new(1, 1024);
        cache.set("a", 1, 8);
        cache.set("b", 2, 8);
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_oversized_value_rejected_without_eviction() {
        let mut cache: BoundedCache<Vec<u8>> = BoundedCache::new(10, 100);
        cache.set("a", vec![0; 10], 10);

        assert!(!cache.set("big", vec![0; 200], 200));
        assert!(cache.contains("a"));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_replace_same_key_updates_size() {
        let mut cache: BoundedCache<String> = BoundedCache::new(10, 100);
        cache.set("a", "short".to_string(), 5);
        cache.set("a", "much longer value".to_string(), 17);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 17);
    }

    #[test]
    fn test_delete_is_not_an_eviction() {
        let mut cache: BoundedCache<u32> = BoundedCache::new(10, 100);
        cache.set("a", 1, 4);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_stats_hit_rate() {
        let mut cache: BoundedCache<u32> = BoundedCache::new(10, 100);
        assert_eq!(cache.stats().hit_rate, 0.0);

        cache.set("a", 1, 4);
        cache.get("a");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_warm_bulk_load() {
        let mut cache: BoundedCache<String> = BoundedCache::new(10, 100);
        let loaded = cache.warm(vec![
            ("a".to_string(), "one".to_string(), 3),
            ("b".to_string(), "two".to_string(), 3),
            ("huge".to_string(), "x".repeat(200), 200),
        ]);
        assert_eq!(loaded, 2);
        assert_eq!(cache.len(), 2);
    }
}
