//! Key-value persistence for thumbnail blobs
//!
//! The store above only needs a handful of operations, so the storage engine
//! sits behind [`BlobBackend`]. The shipped implementation is `SQLite`.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{CacheError, Result};
use crate::fingerprint::FingerprintKey;

/// Value of the `format` property written when a database is created
pub const FORMAT_VERSION: &str = "thumbcache-1";

/// Minimal storage interface used by [`crate::ThumbnailStore`]
pub trait BlobBackend: Send {
    /// Fetch the blob stored under `key`
    fn get(&self, key: &FingerprintKey) -> Result<Option<Vec<u8>>>;

    /// Insert or replace a single blob
    fn put(&mut self, key: &FingerprintKey, blob: &[u8]) -> Result<()>;

    /// Insert or replace many blobs in one transaction
    fn put_batch(
        &mut self,
        entries: &mut dyn Iterator<Item = (&FingerprintKey, &[u8])>,
    ) -> Result<usize>;

    /// Remove every blob
    fn delete_all(&mut self) -> Result<()>;

    /// Read a property value
    fn property(&self, name: &str) -> Result<Option<String>>;

    /// Number of stored blobs
    fn count(&self) -> Result<u64>;
}

/// `SQLite`-backed blob storage
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }

        let conn = Connection::open(path)?;
        let backend = Self { conn };
        backend.init()?;

        tracing::debug!("Opened thumbnail database at {}", path.display());
        Ok(backend)
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self> {
        let backend = Self {
            conn: Connection::open_in_memory()?,
        };
        backend.init()?;
        Ok(backend)
    }

    /// Create tables and write the format marker.
    ///
    /// `INSERT OR IGNORE` keeps the marker of whoever created the file first.
    fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS thumbs (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS property (
                key TEXT PRIMARY KEY,
                value TEXT
            );
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO property (key, value) VALUES ('format', ?1)",
            params![FORMAT_VERSION],
        )?;

        Ok(())
    }
}

impl BlobBackend for SqliteBackend {
    fn get(&self, key: &FingerprintKey) -> Result<Option<Vec<u8>>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM thumbs WHERE key = ?1")?;
        let blob = stmt
            .query_row(params![key.as_bytes().as_slice()], |row| row.get(0))
            .optional()?;
        Ok(blob)
    }

    fn put(&mut self, key: &FingerprintKey, blob: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO thumbs (key, value) VALUES (?1, ?2)",
            params![key.as_bytes().as_slice(), blob],
        )?;
        Ok(())
    }

    fn put_batch(
        &mut self,
        entries: &mut dyn Iterator<Item = (&FingerprintKey, &[u8])>,
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt =
                tx.prepare_cached("INSERT OR REPLACE INTO thumbs (key, value) VALUES (?1, ?2)")?;
            for (key, blob) in entries {
                stmt.execute(params![key.as_bytes().as_slice(), blob])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn delete_all(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM thumbs", [])?;
        Ok(())
    }

    fn property(&self, name: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM property WHERE key = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM thumbs", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
