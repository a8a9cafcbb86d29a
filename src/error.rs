//! Error types for the bitmap pool
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

// == Pool Error Enum ==
/// Unified error type for both cache tiers and the pool built on them.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Target directory is missing or not writable
    #[error("Cache directory is not available: {}", .0.display())]
    DirectoryUnavailable(PathBuf),

    /// The on-disk journal could not be understood
    #[error("Corrupt journal at line {line}: {reason}")]
    CorruptJournal { line: usize, reason: String },

    /// Operation attempted on a released pool
    #[error("The pool has been released; create a new instance for use")]
    Released,

    /// Operation attempted on a closed disk store
    #[error("The disk store is closed")]
    StoreClosed,

    /// Key rejected by the disk store
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Another editor is open for the same key
    #[error("An edit is already in progress for key: {0}")]
    EditInProgress(String),

    /// Value could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Journal record could not be serialized
    #[error("Journal encoding error: {0}")]
    Journal(#[from] serde_json::Error),
}

impl From<image::ImageError> for PoolError {
    fn from(err: image::ImageError) -> Self {
        PoolError::Codec(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the bitmap pool.
pub type Result<T> = std::result::Result<T, PoolError>;
