//! # thumbcache
//!
//! Two-layer thumbnail caching for image archive viewers.
//!
//! ## Overview
//!
//! Generating a thumbnail means decoding and resampling a full image, so
//! thumbnails are cached twice: on disk, keyed by a fingerprint of the
//! source, so they survive restarts; and in memory, where a bounded pool
//! releases the pixels of the least recently populated thumbnails.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Decode pipeline (caller)                 │
//! │   probe store ─▶ decode on miss ─▶ enqueue save ─▶ pool.add │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┴───────────────────┐
//!          ▼                                       ▼
//! ┌─────────────────┐                     ┌─────────────────┐
//! │ ThumbnailStore  │                     │  ThumbnailPool  │
//! │                 │                     │                 │
//! │ • load / save   │                     │ • generations   │
//! │ • reset / move  │                     │ • 150% / 120%   │
//! └─────────────────┘                     └─────────────────┘
//!          │
//!          ├─────────────────────┐
//!          ▼                     ▼
//! ┌─────────────────┐   ┌─────────────────┐
//! │  Debounced      │   │  BlobBackend    │
//! │  WriteQueue     │──▶│  (SQLite)       │
//! └─────────────────┘   └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`fingerprint`] - SHA-256 cache keys from source identity
//! - [`debounce`] - Batching write queue with idle/max-wait timing
//! - [`backend`] - Key-value storage trait and `SQLite` implementation
//! - [`store`] - Persistent thumbnail store
//! - [`pool`] - Bounded in-memory pool
//! - [`thumbnail`] - Thumbnail objects and blob encoding
//! - [`config`] - Configuration management
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use thumbcache::{Config, Thumbnail, ThumbnailPool, ThumbnailStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = ThumbnailStore::open(config.store_options())?;
//!     let pool = ThumbnailPool::new(config.pool_limit);
//!
//!     let thumb = Arc::new(Thumbnail::new());
//!     thumbcache::thumbnail::load_thumbnail(
//!         &store,
//!         &pool,
//!         &thumb,
//!         "page-001.jpg".as_ref(),
//!         thumbcache::thumbnail::DEFAULT_MAX_DIMENSION,
//!     )?;
//!
//!     store.flush()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod backend;
pub mod config;
pub mod debounce;
pub mod error;
pub mod fingerprint;
pub mod paths;
pub mod pool;
pub mod store;
pub mod thumbnail;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Re-export main types for convenience
pub use backend::{BlobBackend, SqliteBackend};
pub use config::Config;
pub use debounce::{DebounceTiming, DebouncedWriteQueue};
pub use error::{CacheError, Result};
pub use fingerprint::FingerprintKey;
pub use pool::{Evictable, ThumbnailPool};
pub use store::{StoreNotice, StoreOptions, StoreStats, ThumbnailStore};
pub use thumbnail::Thumbnail;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Lock a mutex, recovering the data if a holder panicked.
///
/// Everything guarded in this crate is bookkeeping that stays consistent
/// between statements, so a poisoned lock is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
