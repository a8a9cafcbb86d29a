//! Tiered Cache Module
//!
//! The pool: a memory tier layered over a disk tier with write-back on
//! eviction.
//!
//! Reads check memory first and fall back to disk. A disk hit is decoded and
//! handed to the caller without being promoted back into memory, so repeated
//! reads of a cold key pay the decode each time. Writes only touch memory;
//! whatever the memory tier evicts is encoded and written to disk on the
//! calling thread, under the pool's write lock.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bitmap::PngCodec;
use crate::cache::{CacheStats, Removal, RemovalCause, SizedEntryStore};
use crate::codec::Codec;
use crate::config::{
    default_memory_capacity, PoolConfig, DEFAULT_DISK_CAPACITY, DEFAULT_MEMORY_BUDGET,
};
use crate::disk::{validate_key, DiskStats, DiskStore};
use crate::error::{PoolError, Result};

/// Pool of decoded bitmaps, written back to disk as PNG.
pub type BitmapPool = TieredCache<PngCodec>;

// == Write-Back Strategy ==
/// Persists an evicted entry's encoded bytes into the disk tier.
///
/// Called with the pool's write lock held. The default implementation does
/// the disk I/O right away; an implementation may hand the bytes off instead
/// as long as later reads still find them.
pub trait WriteBack: Send + Sync {
    fn write_back(&self, disk: &DiskStore, key: &str, encoded: &[u8]) -> Result<()>;
}

/// Commits each evicted entry and syncs the journal before returning.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncWriteBack;

impl WriteBack for SyncWriteBack {
    fn write_back(&self, disk: &DiskStore, key: &str, encoded: &[u8]) -> Result<()> {
        disk.write(key, encoded)?;
        disk.flush()
    }
}

// == Pool Stats ==
/// Snapshot of both tiers plus failures absorbed on the best-effort paths.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub memory: CacheStats,
    pub disk: DiskStats,
    /// Evicted entries that could not be encoded or written
    pub write_back_failures: u64,
    /// Disk hits that failed to read or decode and were served as misses
    pub read_failures: u64,
}

struct PoolState<V> {
    memory: Mutex<SizedEntryStore<Arc<V>>>,
    disk: DiskStore,
    released: bool,
}

impl<V> PoolState<V> {
    fn ensure_active(&self) -> Result<()> {
        if self.released {
            Err(PoolError::Released)
        } else {
            Ok(())
        }
    }

    fn memory(&self) -> MutexGuard<'_, SizedEntryStore<Arc<V>>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// == Tiered Cache ==
/// Two-tier write-back cache: bounded memory over bounded disk.
///
/// One reader/writer lock guards the whole pool. `get` and the accessors
/// share it; `put`, `flush`, `remove` and `release` take it exclusively,
/// including for the disk writes their evictions trigger.
///
/// Once [`release`](TieredCache::release)d, every operation fails with
/// [`PoolError::Released`].
pub struct TieredCache<C: Codec> {
    codec: Arc<C>,
    write_back: Box<dyn WriteBack>,
    state: RwLock<PoolState<C::Value>>,
    write_back_failures: AtomicU64,
    read_failures: AtomicU64,
}

impl<C: Codec> TieredCache<C> {
    // == Constructors ==
    /// Opens a pool with an explicit codec and configuration.
    ///
    /// # Errors
    /// Fails if the configured directory is missing or not writable, or if
    /// the disk tier's journal cannot be read.
    pub fn open_with_codec(codec: C, config: &PoolConfig) -> Result<Self> {
        check_directory(&config.directory)?;

        let codec = Arc::new(codec);
        let sizer_codec = Arc::clone(&codec);
        let memory = SizedEntryStore::new(config.memory_capacity, move |_, value: &Arc<C::Value>| {
            sizer_codec.size_of(value)
        });
        let disk = DiskStore::open(&config.directory, config.app_version, config.disk_capacity)?;

        info!(
            directory = %config.directory.display(),
            memory_capacity = config.memory_capacity,
            disk_capacity = config.disk_capacity,
            "Pool opened"
        );

        Ok(Self {
            codec,
            write_back: Box::new(SyncWriteBack),
            state: RwLock::new(PoolState {
                memory: Mutex::new(memory),
                disk,
                released: false,
            }),
            write_back_failures: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
        })
    }

    /// Replaces the strategy used to persist evicted entries.
    pub fn with_write_back<W: WriteBack + 'static>(mut self, write_back: W) -> Self {
        self.write_back = Box::new(write_back);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, PoolState<C::Value>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PoolState<C::Value>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // == Put ==
    /// Stores a value in the memory tier.
    ///
    /// Entries the memory tier evicts to make room are written back to disk
    /// before this returns. A failed write-back is logged and counted; the
    /// entry is gone from memory either way.
    pub fn put(&self, key: &str, value: impl Into<Arc<C::Value>>) -> Result<()> {
        let state = self.write();
        state.ensure_active()?;
        validate_key(key)?;

        let removals = state.memory().put(key, value.into());
        self.settle(&state.disk, removals);
        Ok(())
    }

    // == Get ==
    /// Looks a key up in memory, then on disk.
    ///
    /// A memory hit refreshes the entry's recency. A disk hit is decoded and
    /// returned without re-entering the memory tier. Disk and decode failures
    /// are logged and reported as a miss.
    pub fn get(&self, key: &str) -> Result<Option<Arc<C::Value>>> {
        let state = self.read();
        state.ensure_active()?;
        validate_key(key)?;

        if let Some(value) = state.memory().get(key) {
            return Ok(Some(Arc::clone(value)));
        }

        let bytes = match state.disk.read(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(key = %key, error = %e, "Disk read failed, treating as miss");
                self.read_failures.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        match self.codec.decode(&bytes) {
            Ok(value) => {
                debug!(key = %key, bytes = bytes.len(), "Served from disk");
                Ok(Some(Arc::new(value)))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Stored entry failed to decode, treating as miss");
                self.read_failures.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    // == Remove ==
    /// Drops a key from both tiers without writing anything back.
    ///
    /// Returns whether either tier held it.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let state = self.write();
        state.ensure_active()?;
        validate_key(key)?;

        let in_memory = state.memory().remove(key).is_some();
        let on_disk = match state.disk.remove(key) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to remove disk entry");
                false
            }
        };
        Ok(in_memory || on_disk)
    }

    // == Flush ==
    /// Evicts every memory entry, writing each back to disk.
    pub fn flush(&self) -> Result<()> {
        let state = self.write();
        state.ensure_active()?;

        let removals = state.memory().trim_to_size(0);
        let count = removals.len();
        self.settle(&state.disk, removals);
        debug!(entries = count, "Memory tier flushed");
        Ok(())
    }

    // == Release ==
    /// Releases the pool and deletes its disk tier.
    pub fn release(&self) -> Result<()> {
        self.release_with(true)
    }

    /// Empties the memory tier and shuts the disk tier down.
    ///
    /// With `clear`, memory entries are discarded and the disk tier's files
    /// are deleted. Without it, memory entries are written back and the disk
    /// tier is closed in place for a later pool to reopen. Either way the
    /// pool is unusable afterwards; releasing twice fails.
    pub fn release_with(&self, clear: bool) -> Result<()> {
        let mut state = self.write();
        state.ensure_active()?;
        state.released = true;

        let removals = state.memory().trim_to_size(0);
        let outcome = if clear {
            drop(removals);
            state.disk.delete()
        } else {
            self.settle(&state.disk, removals);
            state.disk.close()
        };
        if let Err(e) = outcome {
            warn!(error = %e, clear, "Failed to shut down disk tier");
        }

        info!(clear, "Pool released");
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.read().released
    }

    // == Accessors ==
    /// Bytes resident in the memory tier.
    pub fn memory_size(&self) -> Result<usize> {
        let state = self.read();
        state.ensure_active()?;
        let size = state.memory().size();
        Ok(size)
    }

    pub fn memory_max_size(&self) -> Result<usize> {
        let state = self.read();
        state.ensure_active()?;
        let max_size = state.memory().max_size();
        Ok(max_size)
    }

    /// Whether the key is resident in memory, without touching recency.
    pub fn contains_in_memory(&self, key: &str) -> Result<bool> {
        let state = self.read();
        state.ensure_active()?;
        let resident = state.memory().contains(key);
        Ok(resident)
    }

    /// Bytes of encoded entries in the disk tier.
    pub fn disk_size(&self) -> Result<u64> {
        let state = self.read();
        state.ensure_active()?;
        Ok(state.disk.size())
    }

    pub fn disk_max_size(&self) -> Result<u64> {
        let state = self.read();
        state.ensure_active()?;
        Ok(state.disk.max_size())
    }

    pub fn directory(&self) -> Result<PathBuf> {
        let state = self.read();
        state.ensure_active()?;
        Ok(state.disk.directory())
    }

    pub fn stats(&self) -> Result<PoolStats> {
        let state = self.read();
        state.ensure_active()?;
        let memory = state.memory().stats();
        Ok(PoolStats {
            memory,
            disk: state.disk.stats(),
            write_back_failures: self.write_back_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
        })
    }

    /// Writes evicted entries back to disk; other removals are simply dropped.
    ///
    /// When a write-back fails, any older disk copy of the key is removed so
    /// the key reads as a miss.
    fn settle(&self, disk: &DiskStore, removals: Vec<Removal<Arc<C::Value>>>) {
        for removal in removals {
            if removal.cause != RemovalCause::Evicted {
                continue;
            }
            let result = self
                .codec
                .encode(&removal.old_value)
                .and_then(|encoded| self.write_back.write_back(disk, &removal.key, &encoded));
            match result {
                Ok(()) => debug!(key = %removal.key, "Evicted entry written back"),
                Err(e) => {
                    warn!(key = %removal.key, error = %e, "Write-back failed, entry lost");
                    self.write_back_failures.fetch_add(1, Ordering::Relaxed);
                    // An older copy on disk would otherwise outlive the newer value
                    if let Err(e) = disk.remove(&removal.key) {
                        warn!(key = %removal.key, error = %e, "Failed to drop stale disk entry");
                    }
                }
            }
        }
    }
}

impl<C: Codec + Default> TieredCache<C> {
    /// Opens a pool in `directory` with explicit capacities.
    pub fn open<P: AsRef<Path>>(
        directory: P,
        memory_capacity: usize,
        disk_capacity: u64,
    ) -> Result<Self> {
        let config = PoolConfig {
            directory: directory.as_ref().to_path_buf(),
            memory_capacity,
            disk_capacity,
            app_version: 0,
        };
        Self::open_with_codec(C::default(), &config)
    }

    /// Opens a pool in `directory` with default capacities.
    pub fn open_in<P: AsRef<Path>>(directory: P) -> Result<Self> {
        Self::open(
            directory,
            default_memory_capacity(DEFAULT_MEMORY_BUDGET),
            DEFAULT_DISK_CAPACITY,
        )
    }

    pub fn open_with_config(config: &PoolConfig) -> Result<Self> {
        Self::open_with_codec(C::default(), config)
    }

    /// Opens a pool in the default directory, creating it if needed.
    pub fn open_default() -> Result<Self> {
        let config = PoolConfig::default();
        fs::create_dir_all(&config.directory)?;
        Self::open_with_config(&config)
    }
}

impl<C: Codec> fmt::Debug for TieredCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        let memory = state.memory();
        f.debug_struct("TieredCache")
            .field("memory", &*memory)
            .field("disk_size", &state.disk.size())
            .field("released", &state.released)
            .finish()
    }
}

/// The pool's directory must exist and accept writes.
fn check_directory(directory: &Path) -> Result<()> {
    match fs::metadata(directory) {
        Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => Ok(()),
        _ => Err(PoolError::DirectoryUnavailable(directory.to_path_buf())),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BytesCodec;
    use tempfile::tempdir;

    type BytePool = TieredCache<BytesCodec>;

    /// Fails every write-back.
    struct BrokenDisk;

    impl WriteBack for BrokenDisk {
        fn write_back(&self, _: &DiskStore, _: &str, _: &[u8]) -> Result<()> {
            Err(PoolError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
    }

    /// Fails write-backs while the shared switch is on.
    struct SwitchableDisk(Arc<std::sync::atomic::AtomicBool>);

    impl WriteBack for SwitchableDisk {
        fn write_back(&self, disk: &DiskStore, key: &str, encoded: &[u8]) -> Result<()> {
            if self.0.load(Ordering::SeqCst) {
                BrokenDisk.write_back(disk, key, encoded)
            } else {
                SyncWriteBack.write_back(disk, key, encoded)
            }
        }
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempdir().unwrap();
        let result = BytePool::open(dir.path().join("absent"), 300, 1024);
        assert!(matches!(result, Err(PoolError::DirectoryUnavailable(_))));
    }

    #[test]
    fn test_file_as_directory_is_fatal() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        assert!(matches!(
            BytePool::open(&file, 300, 1024),
            Err(PoolError::DirectoryUnavailable(_))
        ));
    }

    #[test]
    fn test_put_then_get_from_memory() {
        let dir = tempdir().unwrap();
        let pool = BytePool::open(dir.path(), 300, 1024).unwrap();

        pool.put("a", vec![1u8; 100]).unwrap();
        assert_eq!(pool.get("a").unwrap().as_deref(), Some(&vec![1u8; 100]));
        assert_eq!(pool.memory_size().unwrap(), 100);
        assert_eq!(pool.disk_size().unwrap(), 0);
    }

    #[test]
    fn test_get_missing() {
        let dir = tempdir().unwrap();
        let pool = BytePool::open(dir.path(), 300, 1024).unwrap();
        assert!(pool.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_replacement_is_not_written_back() {
        let dir = tempdir().unwrap();
        let pool = BytePool::open(dir.path(), 300, 1024).unwrap();

        pool.put("a", vec![1u8; 10]).unwrap();
        pool.put("a", vec![2u8; 10]).unwrap();

        assert_eq!(pool.disk_size().unwrap(), 0);
        assert_eq!(pool.get("a").unwrap().as_deref(), Some(&vec![2u8; 10]));
    }

    #[test]
    fn test_remove_clears_both_tiers() {
        let dir = tempdir().unwrap();
        let pool = BytePool::open(dir.path(), 100, 1024).unwrap();

        pool.put("a", vec![0u8; 100]).unwrap();
        pool.put("b", vec![0u8; 100]).unwrap();
        assert!(!pool.contains_in_memory("a").unwrap());

        assert!(pool.remove("a").unwrap());
        assert!(pool.remove("b").unwrap());
        assert!(!pool.remove("a").unwrap());
        assert!(pool.get("a").unwrap().is_none());
        assert!(pool.get("b").unwrap().is_none());
    }

    #[test]
    fn test_failed_write_back_still_evicts() {
        let dir = tempdir().unwrap();
        let pool = BytePool::open(dir.path(), 100, 1024)
            .unwrap()
            .with_write_back(BrokenDisk);

        pool.put("a", vec![0u8; 100]).unwrap();
        pool.put("b", vec![0u8; 100]).unwrap();

        assert!(!pool.contains_in_memory("a").unwrap());
        assert!(pool.get("a").unwrap().is_none());
        assert_eq!(pool.stats().unwrap().write_back_failures, 1);
    }

    #[test]
    fn test_failed_write_back_never_serves_older_value() {
        let dir = tempdir().unwrap();
        let failing = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let pool = BytePool::open(dir.path(), 100, 1024)
            .unwrap()
            .with_write_back(SwitchableDisk(Arc::clone(&failing)));

        pool.put("a", vec![0u8; 100]).unwrap();
        pool.put("b", vec![1u8; 100]).unwrap();
        assert_eq!(pool.disk_size().unwrap(), 100);

        pool.put("a", vec![2u8; 100]).unwrap();
        failing.store(true, Ordering::SeqCst);
        pool.put("c", vec![3u8; 100]).unwrap();

        assert!(pool.get("a").unwrap().is_none());
        assert_eq!(pool.stats().unwrap().write_back_failures, 1);
        assert_eq!(pool.get("b").unwrap().as_deref(), Some(&vec![1u8; 100]));
    }

    #[test]
    fn test_undecodable_disk_entry_is_a_miss() {
        let dir = tempdir().unwrap();
        {
            let disk = DiskStore::open(dir.path(), 0, 1024).unwrap();
            disk.write("bad", b"not a png").unwrap();
        }

        let pool = BitmapPool::open(dir.path(), 1024, 1024).unwrap();
        assert!(pool.get("bad").unwrap().is_none());
        assert_eq!(pool.stats().unwrap().read_failures, 1);
    }

    #[test]
    fn test_invalid_key_rejected() {
        let dir = tempdir().unwrap();
        let pool = BytePool::open(dir.path(), 300, 1024).unwrap();

        assert!(matches!(pool.put("", vec![1u8]), Err(PoolError::InvalidKey(_))));
        assert!(matches!(pool.get(""), Err(PoolError::InvalidKey(_))));
    }

    #[test]
    fn test_release_without_clear_keeps_disk() {
        let dir = tempdir().unwrap();
        let pool = BytePool::open(dir.path(), 300, 1024).unwrap();
        pool.put("a", vec![7u8; 10]).unwrap();
        pool.release_with(false).unwrap();

        let reopened = BytePool::open(dir.path(), 300, 1024).unwrap();
        assert_eq!(reopened.get("a").unwrap().as_deref(), Some(&vec![7u8; 10]));
    }

    #[test]
    fn test_release_with_clear_deletes_disk() {
        let dir = tempdir().unwrap();
        let pool = BytePool::open(dir.path(), 100, 1024).unwrap();
        pool.put("a", vec![7u8; 100]).unwrap();
        pool.put("b", vec![7u8; 100]).unwrap();
        pool.release().unwrap();

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(pool.is_released());
    }

    #[test]
    fn test_stats_snapshot() {
        let dir = tempdir().unwrap();
        let pool = BytePool::open(dir.path(), 100, 1024).unwrap();
        pool.put("a", vec![0u8; 60]).unwrap();
        pool.put("b", vec![0u8; 60]).unwrap();
        pool.get("a").unwrap();
        pool.get("b").unwrap();

        let stats = pool.stats().unwrap();
        assert_eq!(stats.memory.evictions, 1);
        assert_eq!(stats.memory.total_size, 60);
        assert_eq!(stats.disk.entry_count, 1);
        assert_eq!(stats.disk.hits, 1);
        assert_eq!(stats.write_back_failures, 0);
    }
}
