//! Memory Tier Module
//!
//! Size-bounded in-memory store with LRU eviction and explicit removal notices.

mod entry;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use entry::{CacheEntry, Removal, RemovalCause};
pub use lru::RecencyList;
pub use stats::CacheStats;
pub use store::{SizedEntryStore, Sizer};
