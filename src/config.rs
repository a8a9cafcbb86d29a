//! Configuration Module
//!
//! Handles loading and managing pool configuration from environment variables.

use std::env;
use std::path::PathBuf;

// == Defaults ==
/// Default disk tier capacity: 10 MiB
pub const DEFAULT_DISK_CAPACITY: u64 = 10 * 1024 * 1024;

/// Default memory budget the memory tier takes its share from: 512 MiB
pub const DEFAULT_MEMORY_BUDGET: usize = 512 * 1024 * 1024;

/// Name of the pool directory under the platform cache root
pub const DEFAULT_DIRECTORY_NAME: &str = "bitmap_pool";

/// Pool configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Directory owned by the disk tier
    pub directory: PathBuf,
    /// Memory tier capacity in bytes
    pub memory_capacity: usize,
    /// Disk tier capacity in bytes
    pub disk_capacity: u64,
    /// Version stamped into the disk journal header
    pub app_version: u32,
}

impl PoolConfig {
    /// Creates a new PoolConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `BITMAP_POOL_DIR` - Pool directory (default: `<cache root>/bitmap_pool`)
    /// - `BITMAP_POOL_MEMORY_BUDGET` - Available memory budget in bytes (default: 512 MiB)
    /// - `BITMAP_POOL_MEMORY_BYTES` - Memory tier capacity (default: budget / 8)
    /// - `BITMAP_POOL_DISK_BYTES` - Disk tier capacity (default: 10 MiB)
    /// - `BITMAP_POOL_APP_VERSION` - Journal version stamp (default: 0)
    pub fn from_env() -> Self {
        let budget = env_parse("BITMAP_POOL_MEMORY_BUDGET").unwrap_or(DEFAULT_MEMORY_BUDGET);

        Self {
            directory: env::var_os("BITMAP_POOL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_directory),
            memory_capacity: env_parse("BITMAP_POOL_MEMORY_BYTES")
                .unwrap_or_else(|| default_memory_capacity(budget)),
            disk_capacity: env_parse("BITMAP_POOL_DISK_BYTES").unwrap_or(DEFAULT_DISK_CAPACITY),
            app_version: env_parse("BITMAP_POOL_APP_VERSION").unwrap_or(0),
        }
    }

    /// Returns a copy of this config pointing at another directory.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            memory_capacity: default_memory_capacity(DEFAULT_MEMORY_BUDGET),
            disk_capacity: DEFAULT_DISK_CAPACITY,
            app_version: 0,
        }
    }
}

// == Utility Functions ==
/// One eighth of the given budget, clamped to the largest addressable size.
pub fn default_memory_capacity(budget: usize) -> usize {
    (budget / 8).min(isize::MAX as usize)
}

/// `<platform cache root>/bitmap_pool`, or the temp dir when no cache root exists.
pub fn default_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join(DEFAULT_DIRECTORY_NAME)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "BITMAP_POOL_DIR",
        "BITMAP_POOL_MEMORY_BUDGET",
        "BITMAP_POOL_MEMORY_BYTES",
        "BITMAP_POOL_DISK_BYTES",
        "BITMAP_POOL_APP_VERSION",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.memory_capacity, DEFAULT_MEMORY_BUDGET / 8);
        assert_eq!(config.disk_capacity, 10 * 1024 * 1024);
        assert_eq!(config.app_version, 0);
        assert!(config.directory.ends_with(DEFAULT_DIRECTORY_NAME));
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env();

        let config = PoolConfig::from_env();
        assert_eq!(config.memory_capacity, DEFAULT_MEMORY_BUDGET / 8);
        assert_eq!(config.disk_capacity, DEFAULT_DISK_CAPACITY);
        assert!(config.directory.ends_with(DEFAULT_DIRECTORY_NAME));
    }

    #[test]
    #[serial]
    fn test_config_from_env_overrides() {
        clear_env();
        env::set_var("BITMAP_POOL_DIR", "/tmp/pool-test");
        env::set_var("BITMAP_POOL_MEMORY_BUDGET", "8000");
        env::set_var("BITMAP_POOL_DISK_BYTES", "4096");

        let config = PoolConfig::from_env();
        assert_eq!(config.directory, PathBuf::from("/tmp/pool-test"));
        assert_eq!(config.memory_capacity, 1000);
        assert_eq!(config.disk_capacity, 4096);

        // Explicit capacity wins over the budget share
        env::set_var("BITMAP_POOL_MEMORY_BYTES", "300");
        assert_eq!(PoolConfig::from_env().memory_capacity, 300);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_from_env_invalid_falls_back() {
        clear_env();
        env::set_var("BITMAP_POOL_DISK_BYTES", "lots");

        let config = PoolConfig::from_env();
        assert_eq!(config.disk_capacity, DEFAULT_DISK_CAPACITY);

        clear_env();
    }

    #[test]
    fn test_default_memory_capacity_is_one_eighth() {
        assert_eq!(default_memory_capacity(800), 100);
        assert_eq!(default_memory_capacity(7), 0);
        assert_eq!(default_memory_capacity(usize::MAX), usize::MAX / 8);
    }
}
