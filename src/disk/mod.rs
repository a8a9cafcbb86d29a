//! Disk Tier Module
//!
//! Journaled on-disk store for encoded entries, bounded by total bytes.

pub mod journal;
mod stats;
mod store;

pub use stats::DiskStats;
pub use store::{DiskStore, Editor};

use crate::error::{PoolError, Result};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 120;

/// Checks a key is usable by the disk tier.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(PoolError::InvalidKey("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(PoolError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}
