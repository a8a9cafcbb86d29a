//! Cache Statistics Module
//!
//! Tracks memory tier metrics including hits, misses, and evictions.

use serde::Serialize;

// == Cache Stats ==
/// Memory tier counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CacheStats {
    /// Successful lookups
    pub hits: u64,
    /// Lookups for absent keys
    pub misses: u64,
    /// Entries removed to satisfy capacity
    pub evictions: u64,
    /// Insertions, including replacements
    pub puts: u64,
    /// Resident entries
    pub total_entries: usize,
    /// Resident bytes, as measured at insertion
    pub total_size: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_put(&mut self) {
        self.puts += 1;
    }
}
