//! Bitmap Pool demo
//!
//! Loads the image files named on the command line into the process-wide
//! pool, flushes them to disk and prints the resulting tier statistics.
//!
//! Configuration comes from the `BITMAP_POOL_*` environment variables; see
//! [`bitmap_pool::PoolConfig::from_env`].

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bitmap_pool::{registry, Bitmap};

fn main() -> Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitmap_pool=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: bitmap_pool <image>...");
        std::process::exit(2);
    }

    let pool = registry::global().context("failed to open the bitmap pool")?;
    info!(directory = %pool.directory()?.display(), "Pool ready");

    let mut keys = Vec::new();
    for path in &paths {
        let key = key_for(Path::new(path));
        match Bitmap::open(path) {
            Ok(bitmap) => {
                info!(key = %key, width = bitmap.width(), height = bitmap.height(), "Caching image");
                pool.put(&key, bitmap)?;
                keys.push(key);
            }
            Err(e) => warn!(path = %path, error = %e, "Skipping unreadable image"),
        }
    }

    pool.flush()?;

    // Everything now comes back from disk
    for key in &keys {
        let found = pool.get(key)?.is_some();
        info!(key = %key, found, "Read back after flush");
    }

    let stats = pool.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    pool.release_with(false)?;
    Ok(())
}

/// File name of the image, used as its cache key.
fn key_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
