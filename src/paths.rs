//! Common paths for thumbcache data storage
//!
//! - `<config_dir>/thumbcache/config.toml` - User configuration
//! - `<data_dir>/thumbcache/thumbnails.db` - Thumbnail database

use std::path::{Path, PathBuf};

use crate::error::{CacheError, Result};

/// File name of the thumbnail database inside its directory
pub const DATABASE_FILE: &str = "thumbnails.db";

const APP_DIR: &str = "thumbcache";

/// Get the default cache directory (`<data_dir>/thumbcache/`)
pub fn default_cache_dir() -> Result<PathBuf> {
    let data = dirs::data_dir().ok_or(CacheError::NoDataDir)?;
    Ok(data.join(APP_DIR))
}

/// Get the default config file path (`<config_dir>/thumbcache/config.toml`)
pub fn config_path() -> Result<PathBuf> {
    let config = dirs::config_dir().ok_or(CacheError::NoDataDir)?;
    Ok(config.join(APP_DIR).join("config.toml"))
}

/// Database file inside `dir`
pub fn database_path(dir: &Path) -> PathBuf {
    dir.join(DATABASE_FILE)
}

/// Compare two paths after resolving symlinks and relative components.
///
/// Paths that do not exist yet are compared as given.
pub fn same_location(a: &Path, b: &Path) -> bool {
    let resolve = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    resolve(a) == resolve(b)
}
