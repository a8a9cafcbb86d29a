//! Integration Tests for the Tiered Cache
//!
//! Exercises the pool through its public API against real temp directories.

use std::sync::Arc;
use std::thread;

use bitmap_pool::{Bitmap, BitmapPool, BytesCodec, PoolError, TieredCache};
use tempfile::tempdir;

type BytePool = TieredCache<BytesCodec>;

// == Helper Functions ==

/// A 5x5 RGBA bitmap: exactly 100 bytes of pixels.
fn bitmap_100b(seed: u8) -> Bitmap {
    let pixels = (0..100u8).map(|i| i.wrapping_mul(seed).wrapping_add(seed)).collect();
    Bitmap::new(5, 5, pixels).unwrap()
}

// == Scenarios ==

#[test]
fn test_fourth_entry_demotes_oldest_to_disk() {
    let dir = tempdir().unwrap();
    let pool = BitmapPool::open(dir.path(), 300, 10 * 1024 * 1024).unwrap();

    pool.put("a", bitmap_100b(1)).unwrap();
    pool.put("b", bitmap_100b(2)).unwrap();
    pool.put("c", bitmap_100b(3)).unwrap();
    assert_eq!(pool.memory_size().unwrap(), 300);
    assert_eq!(pool.disk_size().unwrap(), 0);

    pool.put("d", bitmap_100b(4)).unwrap();

    assert_eq!(pool.memory_size().unwrap(), 300);
    assert!(!pool.contains_in_memory("a").unwrap());
    assert!(pool.disk_size().unwrap() > 0);
    assert_eq!(*pool.get("a").unwrap().unwrap(), bitmap_100b(1));
}

#[test]
fn test_flush_moves_everything_to_disk() {
    let dir = tempdir().unwrap();
    let pool = BitmapPool::open(dir.path(), 1024, 10 * 1024 * 1024).unwrap();

    for (key, seed) in [("x", 7), ("y", 8), ("z", 9)] {
        pool.put(key, bitmap_100b(seed)).unwrap();
    }
    pool.flush().unwrap();

    assert_eq!(pool.memory_size().unwrap(), 0);
    for (key, seed) in [("x", 7), ("y", 8), ("z", 9)] {
        assert_eq!(*pool.get(key).unwrap().unwrap(), bitmap_100b(seed));
    }
}

#[test]
fn test_disk_hit_is_not_promoted() {
    let dir = tempdir().unwrap();
    let pool = BitmapPool::open(dir.path(), 1024, 10 * 1024 * 1024).unwrap();

    pool.put("cold", bitmap_100b(5)).unwrap();
    pool.flush().unwrap();

    assert!(pool.get("cold").unwrap().is_some());
    assert!(pool.get("cold").unwrap().is_some());

    assert!(!pool.contains_in_memory("cold").unwrap());
    assert_eq!(pool.memory_size().unwrap(), 0);
    assert_eq!(pool.stats().unwrap().disk.hits, 2);
}

#[test]
fn test_memory_hit_refreshes_recency() {
    let dir = tempdir().unwrap();
    let pool = BytePool::open(dir.path(), 300, 1024 * 1024).unwrap();

    pool.put("k1", vec![1u8; 100]).unwrap();
    pool.put("k2", vec![2u8; 100]).unwrap();
    pool.put("k3", vec![3u8; 100]).unwrap();
    pool.get("k1").unwrap();
    pool.put("k4", vec![4u8; 100]).unwrap();

    assert!(pool.contains_in_memory("k1").unwrap());
    assert!(!pool.contains_in_memory("k2").unwrap());
    assert_eq!(pool.get("k2").unwrap().as_deref(), Some(&vec![2u8; 100]));
}

#[test]
fn test_oversized_entry_goes_straight_to_disk() {
    let dir = tempdir().unwrap();
    let pool = BytePool::open(dir.path(), 50, 1024 * 1024).unwrap();

    pool.put("big", vec![9u8; 500]).unwrap();

    assert_eq!(pool.memory_size().unwrap(), 0);
    assert_eq!(pool.disk_size().unwrap(), 500);
    assert_eq!(pool.get("big").unwrap().as_deref(), Some(&vec![9u8; 500]));
}

#[test]
fn test_disk_capacity_evicts_for_good() {
    let dir = tempdir().unwrap();
    let pool = BytePool::open(dir.path(), 100, 250).unwrap();

    for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
        pool.put(key, vec![i as u8; 100]).unwrap();
    }
    // a, b and c were written back; the disk tier only holds two of them
    assert!(pool.disk_size().unwrap() <= 250);
    assert!(pool.get("a").unwrap().is_none());
    assert!(pool.get("b").unwrap().is_some());
    assert!(pool.get("c").unwrap().is_some());
}

#[test]
fn test_memory_capacity_respected_under_churn() {
    let dir = tempdir().unwrap();
    let pool = BytePool::open(dir.path(), 1000, 1024 * 1024).unwrap();

    for i in 0..200usize {
        let key = format!("key{}", i % 37);
        pool.put(&key, vec![(i % 251) as u8; (i * 13) % 300]).unwrap();
        if i % 3 == 0 {
            pool.get(&format!("key{}", (i * 7) % 37)).unwrap();
        }
        assert!(pool.memory_size().unwrap() <= 1000);
    }
}

// == Lifecycle ==

#[test]
fn test_every_operation_fails_after_release() {
    let dir = tempdir().unwrap();
    let pool = BytePool::open(dir.path(), 300, 1024).unwrap();
    pool.put("a", vec![1u8]).unwrap();
    pool.release().unwrap();

    assert!(matches!(pool.put("a", vec![1u8]), Err(PoolError::Released)));
    assert!(matches!(pool.get("a"), Err(PoolError::Released)));
    assert!(matches!(pool.remove("a"), Err(PoolError::Released)));
    assert!(matches!(pool.flush(), Err(PoolError::Released)));
    assert!(matches!(pool.memory_size(), Err(PoolError::Released)));
    assert!(matches!(pool.memory_max_size(), Err(PoolError::Released)));
    assert!(matches!(pool.disk_size(), Err(PoolError::Released)));
    assert!(matches!(pool.disk_max_size(), Err(PoolError::Released)));
    assert!(matches!(pool.directory(), Err(PoolError::Released)));
    assert!(matches!(pool.stats(), Err(PoolError::Released)));
    assert!(matches!(pool.release(), Err(PoolError::Released)));
    assert!(matches!(pool.release_with(false), Err(PoolError::Released)));
}

#[test]
fn test_persists_across_instances() {
    let dir = tempdir().unwrap();
    {
        let pool = BitmapPool::open(dir.path(), 1024, 1024 * 1024).unwrap();
        pool.put("kept", bitmap_100b(3)).unwrap();
        pool.release_with(false).unwrap();
    }

    let pool = BitmapPool::open(dir.path(), 1024, 1024 * 1024).unwrap();
    assert_eq!(*pool.get("kept").unwrap().unwrap(), bitmap_100b(3));
    assert_eq!(pool.directory().unwrap(), dir.path());
}

#[test]
fn test_accessors_report_configuration() {
    let dir = tempdir().unwrap();
    let pool = BytePool::open(dir.path(), 4096, 8192).unwrap();

    assert_eq!(pool.memory_max_size().unwrap(), 4096);
    assert_eq!(pool.disk_max_size().unwrap(), 8192);
}

// == Concurrency ==

#[test]
fn test_concurrent_readers_and_writers() {
    let dir = tempdir().unwrap();
    let pool = Arc::new(BytePool::open(dir.path(), 2_000, 1024 * 1024).unwrap());

    let writers: Vec<_> = (0..4u8)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..50u8 {
                    pool.put(&format!("t{}-{}", t, i), vec![t ^ i; 100]).unwrap();
                }
            })
        })
        .collect();
    let readers: Vec<_> = (0..4u8)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..50u8 {
                    if let Some(value) = pool.get(&format!("t{}-{}", t, i)).unwrap() {
                        assert_eq!(*value, vec![t ^ i; 100]);
                    }
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    assert!(pool.memory_size().unwrap() <= 2_000);
    // Every entry is still reachable from one tier or the other
    for t in 0..4u8 {
        for i in 0..50u8 {
            let value = pool.get(&format!("t{}-{}", t, i)).unwrap();
            assert_eq!(value.as_deref(), Some(&vec![t ^ i; 100]));
        }
    }
}
