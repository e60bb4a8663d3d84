//! Thumbnail objects and blob conversion.
//!
//! A [`Thumbnail`] is owned by whoever renders it. Its pixel data can be
//! released by the pool at any time; callers that find it empty should load
//! it again.

use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use image::{DynamicImage, ImageFormat};

use crate::error::{CacheError, Result};
use crate::fingerprint::FingerprintKey;
use crate::pool::{Evictable, ThumbnailPool};
use crate::store::ThumbnailStore;

/// Default longest edge of a generated thumbnail, in pixels
pub const DEFAULT_MAX_DIMENSION: u32 = 256;

/// A thumbnail whose decoded pixels may come and go
#[derive(Default)]
pub struct Thumbnail {
    image: RwLock<Option<Arc<DynamicImage>>>,
}

impl Thumbnail {
    /// Create an empty thumbnail
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pixel data
    pub fn populate(&self, image: DynamicImage) {
        *self.image.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(image));
    }

    /// Current pixel data, if populated
    pub fn image(&self) -> Option<Arc<DynamicImage>> {
        self.image
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether pixel data is present
    pub fn is_populated(&self) -> bool {
        self.image
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Evictable for Thumbnail {
    fn clear(&self) {
        *self.image.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Downscale `image` so its longest edge is at most `max_dimension`,
/// keeping the aspect ratio.
pub fn make_thumbnail(image: &DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());

    if width <= max_dimension && height <= max_dimension {
        return image.clone();
    }

    let ratio = f64::from(width) / f64::from(height);
    let (new_width, new_height) = if width > height {
        (max_dimension, (f64::from(max_dimension) / ratio) as u32)
    } else {
        ((f64::from(max_dimension) * ratio) as u32, max_dimension)
    };

    image.resize(
        new_width.max(1),
        new_height.max(1),
        image::imageops::FilterType::Triangle,
    )
}

/// Encode a thumbnail as a PNG blob for the store
pub fn encode_blob(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Decode a blob read from the store
pub fn decode_blob(blob: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(blob)?)
}

/// Where a loaded thumbnail came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Found in the persistent store
    Cached,
    /// Decoded from the source and queued for saving
    Generated,
}

/// Populate `thumbnail` for the image file at `source`.
///
/// Probes the store first; on a miss the source is decoded, downscaled and
/// queued for saving. Either way the thumbnail is registered with `pool`.
pub fn load_thumbnail(
    store: &ThumbnailStore,
    pool: &ThumbnailPool<Thumbnail>,
    thumbnail: &Arc<Thumbnail>,
    source: &Path,
    max_dimension: u32,
) -> Result<LoadOutcome> {
    let key = FingerprintKey::for_file(source, &format!("png:{max_dimension}"))?;

    let outcome = match store.load(&key)? {
        Some(blob) => {
            thumbnail.populate(decode_blob(&blob)?);
            LoadOutcome::Cached
        }
        None => {
            let original = image::open(source).map_err(|e| match e {
                image::ImageError::IoError(io) => CacheError::io(source, io),
                other => CacheError::Image(other),
            })?;
            let small = make_thumbnail(&original, max_dimension);
            store.enqueue_save(key, encode_blob(&small)?);
            thumbnail.populate(small);
            LoadOutcome::Generated
        }
    };

    pool.add(thumbnail);
    Ok(outcome)
}
