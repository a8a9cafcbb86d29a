//! Bitmap Pool - A two-tier cache for decoded bitmaps
//!
//! A size-bounded in-memory LRU layered over a persistent on-disk LRU.
//! Entries evicted from memory are encoded and written back to disk; lookups
//! that miss in memory fall back to disk and decode.

pub mod bitmap;
pub mod cache;
pub mod codec;
pub mod config;
pub mod disk;
pub mod error;
pub mod pool;
pub mod registry;

pub use bitmap::{Bitmap, PngCodec};
pub use codec::{BytesCodec, Codec};
pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use pool::{BitmapPool, PoolStats, SyncWriteBack, TieredCache, WriteBack};
pub use registry::PoolRegistry;
