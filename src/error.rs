//! Error type shared by the cache layers

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the thumbnail cache.
///
/// A missing key is never an error; lookups return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The underlying `SQLite` database failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A filesystem operation failed
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path the operation was working on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Encoding or decoding a thumbnail blob failed
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// No application-data directory could be determined
    #[error("could not determine the application data directory")]
    NoDataDir,

    /// The debounced writer was created outside a Tokio runtime
    #[error("a Tokio runtime is required to schedule background flushes")]
    NoRuntime,

    /// A move target already contains a cache file
    #[error("a thumbnail cache already exists at {}", .0.display())]
    DestinationExists(PathBuf),

    /// A fingerprint string was not 64 hex characters
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),
}

impl CacheError {
    /// Wrap an I/O error together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CacheError>;
