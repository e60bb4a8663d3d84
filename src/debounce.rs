//! Debounced write-back queue
//!
//! Writes are collected in a pending map and handed to a sink as one batch
//! once the queue has been idle for `min_idle`, but never later than
//! `max_wait` after the first write of that batch. A background Tokio task
//! owns the timer; `flush` may also be called synchronously from any thread.
//!
//! While a batch is being written it stays visible to [`DebouncedWriteQueue::try_peek`]
//! until the sink returns, so readers never observe a window in which an
//! entry is neither pending nor durable.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::{CacheError, Result};
use crate::lock;

/// Default idle period before a batch is flushed
pub const DEFAULT_MIN_IDLE: Duration = Duration::from_millis(500);

/// Default upper bound on how long a batch may be held back
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(2);

/// Timing contract for a [`DebouncedWriteQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTiming {
    /// Quiet period after the last enqueue
    pub min_idle: Duration,
    /// Maximum delay after the first enqueue of a batch
    pub max_wait: Duration,
}

impl Default for DebounceTiming {
    fn default() -> Self {
        Self {
            min_idle: DEFAULT_MIN_IDLE,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl DebounceTiming {
    fn deadline(&self, first: Instant, last: Instant) -> Instant {
        (last + self.min_idle).min(first + self.max_wait)
    }
}

/// Callback receiving errors from background flushes
pub type ErrorHook = Arc<dyn Fn(&CacheError) + Send + Sync>;

type FlushSink<K, V> = Box<dyn Fn(&HashMap<K, V>) -> Result<()> + Send + Sync>;

struct Batch<K, V> {
    pending: HashMap<K, V>,
    in_flight: Option<Arc<HashMap<K, V>>>,
    first_enqueued: Option<Instant>,
    last_enqueued: Option<Instant>,
}

struct Shared<K, V> {
    batch: Mutex<Batch<K, V>>,
    // Serializes flushes so an older snapshot can never commit after a newer one
    flush_gate: Mutex<()>,
    sink: FlushSink<K, V>,
    on_error: Option<ErrorHook>,
    timing: DebounceTiming,
}

impl<K, V> Shared<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn deadline(&self) -> Option<Instant> {
        let batch = lock(&self.batch);
        match (batch.first_enqueued, batch.last_enqueued) {
            (Some(first), Some(last)) => Some(self.timing.deadline(first, last)),
            _ => None,
        }
    }

    fn flush(&self) -> Result<usize> {
        let _gate = lock(&self.flush_gate);

        let snapshot = {
            let mut batch = lock(&self.batch);
            batch.first_enqueued = None;
            batch.last_enqueued = None;
            if batch.pending.is_empty() {
                return Ok(0);
            }
            let taken = Arc::new(std::mem::take(&mut batch.pending));
            batch.in_flight = Some(Arc::clone(&taken));
            taken
        };

        let result = (self.sink)(&snapshot);

        let mut batch = lock(&self.batch);
        batch.in_flight = None;
        match result {
            Ok(()) => Ok(snapshot.len()),
            Err(e) => {
                // Newer values enqueued during the failed write win
                for (key, value) in snapshot.iter() {
                    batch
                        .pending
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                Err(e)
            }
        }
    }

    fn report(&self, error: &CacheError) {
        tracing::error!("Background flush failed, batch re-queued: {error}");
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }
}

/// Batches writes and flushes them after a debounce interval.
///
/// A batch that fails to write goes back into the queue without a deadline
/// of its own. The background timer does not retry it; it is written with
/// the next enqueued batch or by the next call to [`Self::flush`].
pub struct DebouncedWriteQueue<K, V> {
    shared: Arc<Shared<K, V>>,
    wake: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl<K, V> DebouncedWriteQueue<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a queue that hands batches to `sink`.
    ///
    /// Must be called from within a Tokio runtime; the timer task is spawned
    /// on the current runtime and stops when the queue is dropped.
    pub fn new<F>(timing: DebounceTiming, sink: F, on_error: Option<ErrorHook>) -> Result<Self>
    where
        F: Fn(&HashMap<K, V>) -> Result<()> + Send + Sync + 'static,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| CacheError::NoRuntime)?;

        let shared = Arc::new(Shared {
            batch: Mutex::new(Batch {
                pending: HashMap::new(),
                in_flight: None,
                first_enqueued: None,
                last_enqueued: None,
            }),
            flush_gate: Mutex::new(()),
            sink: Box::new(sink),
            on_error,
            timing,
        });
        let wake = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));

        handle.spawn(timer_task(
            Arc::downgrade(&shared),
            Arc::clone(&wake),
            Arc::clone(&closed),
        ));

        Ok(Self {
            shared,
            wake,
            closed,
        })
    }

    /// Queue a write, replacing any pending value for the same key.
    pub fn enqueue(&self, key: K, value: V) {
        let now = Instant::now();
        let starts_batch = {
            let mut batch = lock(&self.shared.batch);
            batch.pending.insert(key, value);
            batch.last_enqueued = Some(now);
            if batch.first_enqueued.is_none() {
                batch.first_enqueued = Some(now);
                true
            } else {
                false
            }
        };

        if starts_batch {
            self.wake.notify_one();
        }
    }

    /// Look up a value that has been enqueued but not yet written
    pub fn try_peek(&self, key: &K) -> Option<V> {
        let batch = lock(&self.shared.batch);
        batch
            .pending
            .get(key)
            .or_else(|| batch.in_flight.as_ref().and_then(|m| m.get(key)))
            .cloned()
    }

    /// Drop a pending value so it will not be written.
    ///
    /// A batch already handed to the sink is not affected.
    pub fn forget(&self, key: &K) -> bool {
        lock(&self.shared.batch).pending.remove(key).is_some()
    }

    /// Discard every pending value, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut batch = lock(&self.shared.batch);
        batch.first_enqueued = None;
        batch.last_enqueued = None;
        let dropped = batch.pending.len();
        batch.pending.clear();
        dropped
    }

    /// Write all pending entries now.
    ///
    /// Returns the number of entries written. On failure the batch is put
    /// back into the queue and the error returned.
    pub fn flush(&self) -> Result<usize> {
        self.shared.flush()
    }

    /// Run `f` while no flush is in progress.
    ///
    /// A flush already running finishes first; flushes started meanwhile
    /// wait until `f` returns. `f` must not call [`Self::flush`].
    pub fn pause_flushes<R>(&self, f: impl FnOnce() -> R) -> R {
        let _gate = lock(&self.shared.flush_gate);
        f()
    }

    /// Number of entries not yet durable (pending plus in flight)
    pub fn len(&self) -> usize {
        let batch = lock(&self.shared.batch);
        batch.pending.len() + batch.in_flight.as_ref().map_or(0, |m| m.len())
    }

    /// Whether nothing is waiting to be written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The timing this queue was created with
    pub fn timing(&self) -> DebounceTiming {
        self.shared.timing
    }
}

impl<K, V> Drop for DebouncedWriteQueue<K, V> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

/// Background task that waits for the debounce deadline of each batch.
async fn timer_task<K, V>(shared: Weak<Shared<K, V>>, wake: Arc<Notify>, closed: Arc<AtomicBool>)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    loop {
        wake.notified().await;
        if closed.load(Ordering::Acquire) {
            break;
        }

        loop {
            let Some(strong) = shared.upgrade() else {
                return;
            };
            let Some(deadline) = strong.deadline() else {
                break;
            };

            // Later enqueues push the deadline back, so re-check after waking
            if Instant::now() < deadline {
                drop(strong);
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
                continue;
            }

            let worker = Arc::clone(&strong);
            match tokio::task::spawn_blocking(move || worker.flush()).await {
                Ok(Ok(count)) => tracing::debug!("Flushed {count} debounced writes"),
                Ok(Err(e)) => strong.report(&e),
                Err(e) => tracing::error!("Flush task panicked: {e}"),
            }
            break;
        }
    }

    tracing::debug!("Debounce timer stopped");
}
