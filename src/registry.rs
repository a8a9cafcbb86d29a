//! Registry Module
//!
//! Holds the pool instance shared across a process.
//!
//! [`PoolRegistry`] is the injectable form: construct one with a factory and
//! pass it where it is needed. [`global`] and [`wrap`] expose a single
//! process-wide registry of [`BitmapPool`]s configured from the environment.

use std::fmt;
use std::fs;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::info;

use crate::bitmap::PngCodec;
use crate::codec::Codec;
use crate::config::PoolConfig;
use crate::error::Result;
use crate::pool::{BitmapPool, TieredCache};

type Factory<C> = Box<dyn Fn() -> Result<TieredCache<C>> + Send + Sync>;

// == Pool Registry ==
/// Holds one pool, built lazily on first access and swappable at runtime.
///
/// The lock guards only the held reference. Replacing the pool never
/// releases the previous one; [`PoolRegistry::wrap`] hands it back so the
/// caller decides its fate.
pub struct PoolRegistry<C: Codec> {
    current: RwLock<Option<Arc<TieredCache<C>>>>,
    factory: Factory<C>,
}

impl<C: Codec> PoolRegistry<C> {
    /// Creates an empty registry that builds its default pool with `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<TieredCache<C>> + Send + Sync + 'static,
    {
        Self {
            current: RwLock::new(None),
            factory: Box::new(factory),
        }
    }

    /// Creates a registry already holding `pool`.
    pub fn with_pool<F>(pool: Arc<TieredCache<C>>, factory: F) -> Self
    where
        F: Fn() -> Result<TieredCache<C>> + Send + Sync + 'static,
    {
        Self {
            current: RwLock::new(Some(pool)),
            factory: Box::new(factory),
        }
    }

    // == Get ==
    /// Returns the held pool, building the default one on first access.
    ///
    /// # Errors
    /// Propagates the factory's error; the registry stays empty and the next
    /// call tries again.
    pub fn get(&self) -> Result<Arc<TieredCache<C>>> {
        {
            let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(pool) = current.as_ref() {
                return Ok(Arc::clone(pool));
            }
        }

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have won the race for the write lock
        if let Some(pool) = current.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new((self.factory)()?);
        *current = Some(Arc::clone(&pool));
        Ok(pool)
    }

    // == Wrap ==
    /// Swaps in `pool` and returns whatever was held before.
    pub fn wrap(&self, pool: Arc<TieredCache<C>>) -> Option<Arc<TieredCache<C>>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        current.replace(pool)
    }

    /// Whether a pool has been built or wrapped yet.
    pub fn is_initialized(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<C: Codec> fmt::Debug for PoolRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

// == Process-Wide Registry ==
static GLOBAL: OnceLock<PoolRegistry<PngCodec>> = OnceLock::new();

fn global_registry() -> &'static PoolRegistry<PngCodec> {
    GLOBAL.get_or_init(|| PoolRegistry::new(open_from_env))
}

/// Builds the default pool from the environment, creating its directory.
///
/// This is the factory behind [`global`].
pub fn open_from_env() -> Result<BitmapPool> {
    let config = PoolConfig::from_env();
    fs::create_dir_all(&config.directory)?;
    info!(directory = %config.directory.display(), "Opening default pool");
    BitmapPool::open_with_config(&config)
}

/// Returns the process-wide pool, opening it on first use.
pub fn global() -> Result<Arc<BitmapPool>> {
    global_registry().get()
}

/// Replaces the process-wide pool, returning the previous one unreleased.
pub fn wrap(pool: Arc<BitmapPool>) -> Option<Arc<BitmapPool>> {
    global_registry().wrap(pool)
}
