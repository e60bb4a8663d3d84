//! Bounded in-memory pool of populated thumbnails
//!
//! The pool keeps the number of thumbnails holding pixel data close to a
//! limit. It does not track accesses. Every [`ThumbnailPool::add`] stamps
//! the thumbnail with a fresh generation and appends a unit to the back of
//! a list; older units for the same thumbnail simply stop matching its
//! current generation and are dropped the next time the list is compacted.
//!
//! This approximates LRU by recency of population rather than recency of
//! use. A precise LRU would need a reorder on every access; here `add` is
//! an append plus an occasional linear sweep, and the two thresholds
//! (150% to start a sweep, 120% to start evicting) keep sweeps rare enough
//! that `add` stays O(1) amortized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::lock;
use crate::thumbnail::Thumbnail;

/// Default target number of populated thumbnails
pub const DEFAULT_LIMIT: usize = 1000;

const SERIAL_MASK: u32 = 0x7fff_ffff;

/// Something whose pixel data the pool may release.
///
/// `clear` must be idempotent and must not call back into the pool.
pub trait Evictable: Send + Sync {
    /// Release pixel data, keeping the object itself usable
    fn clear(&self);
}

struct ThumbnailUnit<T> {
    thumbnail: Weak<T>,
    generation: u32,
}

impl<T> ThumbnailUnit<T> {
    fn id(&self) -> usize {
        self.thumbnail.as_ptr() as usize
    }

    fn is_valid(&self, generations: &HashMap<usize, u32>) -> bool {
        self.thumbnail.strong_count() > 0
            && generations.get(&self.id()) == Some(&self.generation)
    }
}

struct PoolState<T> {
    units: Vec<ThumbnailUnit<T>>,
    // Latest generation per thumbnail, keyed by allocation address
    generations: HashMap<usize, u32>,
    serial: u32,
    limit: usize,
}

impl<T: Evictable> PoolState<T> {
    fn sweep_threshold(&self) -> usize {
        self.limit * 3 / 2
    }

    fn evict_threshold(&self) -> usize {
        self.limit * 6 / 5
    }

    fn next_serial(&mut self) -> u32 {
        self.serial = (self.serial + 1) & SERIAL_MASK;
        self.serial
    }

    fn cleanup(&mut self) -> bool {
        if self.units.len() < self.sweep_threshold() {
            return false;
        }

        // Drop superseded and orphaned units; nothing is released here
        let before = self.units.len();
        let generations = &self.generations;
        self.units.retain(|unit| unit.is_valid(generations));
        self.generations = self
            .units
            .iter()
            .map(|unit| (unit.id(), unit.generation))
            .collect();
        tracing::debug!(
            "Thumbnail pool compacted {before} -> {} units",
            self.units.len()
        );

        if self.units.len() < self.evict_threshold() {
            return false;
        }

        let erase = self.units.len().saturating_sub(self.limit);
        for unit in self.units.drain(..erase) {
            self.generations.remove(&unit.id());
            if let Some(thumbnail) = unit.thumbnail.upgrade() {
                thumbnail.clear();
            }
        }
        tracing::debug!("Thumbnail pool evicted {erase} thumbnails");
        erase > 0
    }
}

/// Registry of populated thumbnails with approximate-LRU eviction
pub struct ThumbnailPool<T = Thumbnail> {
    state: Mutex<PoolState<T>>,
}

impl<T: Evictable> Default for ThumbnailPool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT)
    }
}

impl<T: Evictable> ThumbnailPool<T> {
    /// Create a pool that keeps about `limit` thumbnails populated
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                units: Vec::new(),
                generations: HashMap::new(),
                serial: 0,
                limit,
            }),
        }
    }

    /// Register a thumbnail whose pixel data was just populated.
    ///
    /// Re-adding a thumbnail moves it to the most recent position; the
    /// earlier unit is left in place and discarded by the next sweep.
    pub fn add(&self, thumbnail: &Arc<T>) {
        let mut state = lock(&self.state);
        let generation = state.next_serial();
        state
            .generations
            .insert(Arc::as_ptr(thumbnail) as usize, generation);
        state.units.push(ThumbnailUnit {
            thumbnail: Arc::downgrade(thumbnail),
            generation,
        });
        state.cleanup();
    }

    /// Compact and, if still over the eviction threshold, clear the oldest
    /// thumbnails down to the limit.
    ///
    /// Returns whether anything was evicted.
    pub fn cleanup(&self) -> bool {
        lock(&self.state).cleanup()
    }

    /// Number of units in the list, including superseded ones
    pub fn len(&self) -> usize {
        lock(&self.state).units.len()
    }

    /// Whether the pool tracks nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of units that still refer to a live, current thumbnail
    pub fn valid_len(&self) -> usize {
        let state = lock(&self.state);
        state
            .units
            .iter()
            .filter(|unit| unit.is_valid(&state.generations))
            .count()
    }

    /// Target number of populated thumbnails
    pub fn limit(&self) -> usize {
        lock(&self.state).limit
    }

    /// Change the limit and apply it immediately
    pub fn set_limit(&self, limit: usize) {
        let mut state = lock(&self.state);
        state.limit = limit;
        state.cleanup();
    }
}
