//! TTL cache with FIFO capacity eviction, used for search results.
//!
//! Entries expire a fixed duration after insertion. When the cache is
//! full the oldest entry is dropped regardless of remaining lifetime.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

struct TtlEntry<T> {
    value: T,
    inserted_at: Instant,
}

pub struct TtlCache<T> {
    entries: HashMap<String, TtlEntry<T>>,

    // Insertion order, oldest first
    order: VecDeque<String>,

    max_entries: usize,
    ttl: Duration,

    hits: u64,
    misses: u64,
}

impl<T> TtlCache<T> {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
            ttl,
            hits: 0,
            misses: 0,
        }
    }

    /// Get a value if present and not expired. Expired entries are
    /// removed on access.
    pub fn get(&mut self, key: &str) -> Option<&T> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };

        if expired {
            self.remove(key);
            self.misses += 1;
            return None;
        }

        self.hits += 1;
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn set(&mut self, key: &str, value: T) {
        if self.entries.contains_key(key) {
            self.remove(key);
        }

        while self.entries.len() >= self.max_entries {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }

        self.entries.insert(
            key.to_string(),
            TtlEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        self.order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn sweep(&mut self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let mut cache: TtlCache<u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(&2));
        assert_eq!(cache.get("c"), Some(&3));
    }

    #[test]
    fn test_expiry_on_access() {
        let mut cache: TtlCache<u32> = TtlCache::new(10, Duration::from_millis(0));
        cache.set("a", 1);
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reinsert_moves_to_back() {
        let mut cache: TtlCache<u32> = TtlCache::new(2, Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        cache.set("c", 3);

        // B was oldest after A's reinsert
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(&10));
    }

    #[test]
    fn test_sweep_removes_expired() {
        let mut cache: TtlCache<u32> = TtlCache::new(10, Duration::from_millis(0));
        cache.set("a", 1);
        cache.set("b", 2);
        assert_eq!(cache.sweep(), 2);
        assert!(cache.is_empty());
    }
}
