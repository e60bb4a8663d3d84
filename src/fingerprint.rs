//! Content fingerprints used as persistent cache keys
//!
//! A fingerprint is the SHA-256 of a thumbnail's logical identity: source
//! name, byte length, last modification time and a free-form appendix that
//! separates differently configured thumbnails of the same source.
//!
//! Two identities that hash to the same digest are treated as the same
//! thumbnail. No secondary check of the source is made; with a 256-bit
//! digest an accidental collision is far less likely than a stale key from
//! a source whose metadata did not change.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// Digest length in bytes
pub const FINGERPRINT_LEN: usize = 32;

/// Cache key derived from a thumbnail's logical identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerprintKey([u8; FINGERPRINT_LEN]);

impl FingerprintKey {
    /// Compute the key for an identity.
    ///
    /// Every field is length-prefixed before hashing so that shifting bytes
    /// between `name` and `appendix` cannot produce the same input stream.
    pub fn compute(name: &str, length: i64, last_update: DateTime<Utc>, appendix: &str) -> Self {
        let mut hasher = Sha256::new();

        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(length.to_le_bytes());
        hasher.update(last_update.timestamp().to_le_bytes());
        hasher.update(last_update.timestamp_subsec_nanos().to_le_bytes());
        hasher.update((appendix.len() as u64).to_le_bytes());
        hasher.update(appendix.as_bytes());

        Self(hasher.finalize().into())
    }

    /// Compute the key for a file on disk from its metadata
    pub fn for_file(path: &Path, appendix: &str) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| CacheError::io(path, e))?;
        let modified = metadata.modified().map_err(|e| CacheError::io(path, e))?;

        Ok(Self::compute(
            &path.to_string_lossy(),
            metadata.len() as i64,
            DateTime::<Utc>::from(modified),
            appendix,
        ))
    }

    /// Raw digest bytes
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for FingerprintKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != FINGERPRINT_LEN * 2 || !s.is_ascii() {
            return Err(CacheError::InvalidFingerprint(s.to_string()));
        }

        let mut bytes = [0u8; FINGERPRINT_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| CacheError::InvalidFingerprint(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}
