//! Disk tier statistics.

use serde::Serialize;

/// Counters and occupancy for the disk tier.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DiskStats {
    /// Reads that found a committed entry
    pub hits: u64,
    /// Reads for absent keys
    pub misses: u64,
    /// Entries removed to satisfy capacity
    pub evictions: u64,
    /// Committed edits
    pub commits: u64,
    /// Committed entries on disk
    pub entry_count: usize,
    /// Bytes of committed entries
    pub size: u64,
    pub max_size: u64,
}

impl DiskStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of the capacity in use (0.0 to 1.0 under normal operation).
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.size as f64 / self.max_size as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratios() {
        let stats = DiskStats {
            hits: 1,
            misses: 3,
            size: 25,
            max_size: 100,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.25);
        assert_eq!(stats.utilization(), 0.25);
        assert_eq!(DiskStats::default().utilization(), 0.0);
    }
}
