//! Sized Entry Store Module
//!
//! Memory tier: a size-bounded map with least-recently-used eviction.

use std::collections::HashMap;
use std::fmt;

use crate::cache::{CacheEntry, CacheStats, RecencyList, Removal};

/// Measures an entry at insertion time.
pub type Sizer<V> = Box<dyn Fn(&str, &V) -> usize + Send + Sync>;

// == Sized Entry Store ==
/// Bounded mapping from key to value where each value carries a size.
///
/// The sum of resident sizes never exceeds `max_size` once a mutating call
/// returns. Every entry that leaves the store is reported back to the caller
/// as a [`Removal`]; the store itself never drops a value silently.
///
/// No internal locking: callers serialize writers themselves.
pub struct SizedEntryStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
    lru: RecencyList,
    stats: CacheStats,
    /// Sum of resident entry sizes
    size: usize,
    max_size: usize,
    sizer: Sizer<V>,
}

impl<V> SizedEntryStore<V> {
    // == Constructor ==
    /// Creates an empty store.
    ///
    /// # Arguments
    /// * `max_size` - Capacity in the units returned by `sizer`
    /// * `sizer` - Evaluated once per insertion; the result is never refreshed
    pub fn new<F>(max_size: usize, sizer: F) -> Self
    where
        F: Fn(&str, &V) -> usize + Send + Sync + 'static,
    {
        Self {
            entries: HashMap::new(),
            lru: RecencyList::new(),
            stats: CacheStats::new(),
            size: 0,
            max_size,
            sizer: Box::new(sizer),
        }
    }

    // == Get ==
    /// Returns the value and marks it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        if self.entries.contains_key(key) {
            self.lru.touch(key);
            self.stats.record_hit();
            self.entries.get(key).map(|entry| &entry.value)
        } else {
            self.stats.record_miss();
            None
        }
    }

    /// Returns the value without touching recency or counters.
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    // == Remove ==
    /// Removes an entry on the caller's behalf.
    pub fn remove(&mut self, key: &str) -> Option<Removal<V>> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.size -= entry.size;
        Some(Removal::explicit(key.to_string(), entry.value))
    }

    // == Trim To Size ==
    /// Evicts least recently used entries until the total is at most `target_size`.
    ///
    /// A target of zero empties the store, zero-sized entries included.
    pub fn trim_to_size(&mut self, target_size: usize) -> Vec<Removal<V>> {
        let mut removals = Vec::new();

        while self.size > target_size || (target_size == 0 && !self.entries.is_empty()) {
            let Some(key) = self.lru.pop_oldest() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                self.size -= entry.size;
                self.stats.record_eviction();
                removals.push(Removal::evicted(key, entry.value));
            }
        }

        removals
    }

    // == Resize ==
    /// Changes the capacity, evicting as needed to honor a smaller one.
    pub fn set_max_size(&mut self, max_size: usize) -> Vec<Removal<V>> {
        self.max_size = max_size;
        self.trim_to_size(max_size)
    }

    /// Sum of resident entry sizes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Resident keys from least to most recently used.
    pub fn keys(&self) -> Vec<String> {
        self.lru.iter().map(str::to_string).collect()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.total_entries = self.entries.len();
        stats.total_size = self.size;
        stats
    }
}

impl<V: Clone> SizedEntryStore<V> {
    // == Put ==
    /// Inserts or replaces a value, then evicts down to capacity.
    ///
    /// A replaced value is reported with the new value alongside it. The
    /// trim that follows may evict the entry just inserted when it alone
    /// exceeds capacity.
    pub fn put(&mut self, key: impl Into<String>, value: V) -> Vec<Removal<V>> {
        let key = key.into();
        let size = (self.sizer)(&key, &value);
        let mut removals = Vec::new();

        self.stats.record_put();
        let previous = self
            .entries
            .insert(key.clone(), CacheEntry::new(value, size));
        self.size += size;
        self.lru.touch(&key);

        if let Some(previous) = previous {
            self.size -= previous.size;
            let current = self.entries[&key].value.clone();
            removals.push(Removal::replaced(key, previous.value, current));
        }

        removals.extend(self.trim_to_size(self.max_size));
        removals
    }
}

impl<V> fmt::Debug for SizedEntryStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizedEntryStore")
            .field("len", &self.entries.len())
            .field("size", &self.size)
            .field("max_size", &self.max_size)
            .finish()
    }
}
