//! Persistent thumbnail store
//!
//! Maps [`FingerprintKey`]s to encoded thumbnail blobs on disk. Most writes
//! go through a [`DebouncedWriteQueue`] so bursts of freshly generated
//! thumbnails land in one transaction; reads consult the queue after the
//! database so a thumbnail saved a moment ago is never reported missing.
//!
//! The backend is opened lazily on first access and every access goes
//! through one connection behind a coarse lock.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::backend::{BlobBackend, SqliteBackend};
use crate::debounce::{DebounceTiming, DebouncedWriteQueue, ErrorHook};
use crate::error::{CacheError, Result};
use crate::fingerprint::FingerprintKey;
use crate::{lock, paths};

/// Opens a backend for a database file path
pub type BackendOpener = Arc<dyn Fn(&Path) -> Result<Box<dyn BlobBackend>> + Send + Sync>;

/// Callback receiving non-fatal notices
pub type NoticeHook = Arc<dyn Fn(&StoreNotice) + Send + Sync>;

/// Non-fatal conditions the caller may want to show to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreNotice {
    /// The configured directory does not exist; the fallback is used instead
    DirectoryFallback {
        /// Directory from the configuration
        requested: PathBuf,
        /// Directory actually used
        fallback: PathBuf,
    },
}

impl fmt::Display for StoreNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectoryFallback {
                requested,
                fallback,
            } => write!(
                f,
                "Thumbnail cache directory {} does not exist, using {}",
                requested.display(),
                fallback.display()
            ),
        }
    }
}

/// Options for [`ThumbnailStore::open`]
#[derive(Clone)]
pub struct StoreOptions {
    /// Start with caching enabled
    pub enabled: bool,
    /// Configured cache directory (None = fallback directory)
    pub directory: Option<PathBuf>,
    /// Directory used when `directory` is unset or missing
    /// (None = application data directory)
    pub fallback_directory: Option<PathBuf>,
    /// Debounce timing for [`ThumbnailStore::enqueue_save`]
    pub timing: DebounceTiming,
    /// Receives directory fallback notices
    pub on_notice: Option<NoticeHook>,
    /// Receives errors from background flushes
    pub on_error: Option<ErrorHook>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            fallback_directory: None,
            timing: DebounceTiming::default(),
            on_notice: None,
            on_error: None,
        }
    }
}

/// Snapshot of store state
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Database file in use
    pub path: PathBuf,
    /// Whether caching is currently enabled
    pub enabled: bool,
    /// Thumbnails stored on disk
    pub records: u64,
    /// Thumbnails waiting to be written
    pub pending: usize,
    /// Format marker written when the database was created
    pub format: Option<String>,
}

struct StoreState {
    backend: Option<Box<dyn BlobBackend>>,
    directory: Option<PathBuf>,
    path: Option<PathBuf>,
}

struct StoreShared {
    state: Mutex<StoreState>,
    opener: BackendOpener,
    fallback_directory: Option<PathBuf>,
    on_notice: Option<NoticeHook>,
}

impl StoreShared {
    fn fallback_directory(&self) -> Result<PathBuf> {
        match &self.fallback_directory {
            Some(dir) => Ok(dir.clone()),
            None => paths::default_cache_dir(),
        }
    }

    fn resolve_directory(&self, configured: Option<&Path>) -> Result<PathBuf> {
        match configured {
            Some(dir) if dir.is_dir() => Ok(dir.to_path_buf()),
            Some(dir) => {
                let fallback = self.fallback_directory()?;
                let notice = StoreNotice::DirectoryFallback {
                    requested: dir.to_path_buf(),
                    fallback: fallback.clone(),
                };
                tracing::warn!("{notice}");
                if let Some(hook) = &self.on_notice {
                    hook(&notice);
                }
                Ok(fallback)
            }
            None => self.fallback_directory(),
        }
    }

    /// Database path for the current state, without opening anything
    fn current_path(&self, state: &StoreState) -> Result<PathBuf> {
        match &state.path {
            Some(path) => Ok(path.clone()),
            None => Ok(paths::database_path(
                &self.resolve_directory(state.directory.as_deref())?,
            )),
        }
    }

    /// Open the backend if the store is still closed
    fn ensure_open<'a>(&self, state: &'a mut StoreState) -> Result<&'a mut dyn BlobBackend> {
        let backend = match state.backend.take() {
            Some(backend) => backend,
            None => {
                let path = self.current_path(state)?;
                let backend = (self.opener)(&path)?;
                state.path = Some(path);
                backend
            }
        };
        Ok(&mut **state.backend.insert(backend))
    }

    fn write_batch(&self, batch: &HashMap<FingerprintKey, Vec<u8>>) -> Result<()> {
        let mut state = lock(&self.state);
        let backend = self.ensure_open(&mut state)?;
        let mut entries = batch.iter().map(|(key, blob)| (key, blob.as_slice()));
        let written = backend.put_batch(&mut entries)?;
        tracing::debug!("Committed {written} thumbnails");
        Ok(())
    }
}

/// Durable key-to-blob thumbnail cache
pub struct ThumbnailStore {
    shared: Arc<StoreShared>,
    queue: DebouncedWriteQueue<FingerprintKey, Vec<u8>>,
    enabled: AtomicBool,
}

impl ThumbnailStore {
    /// Create a store backed by `SQLite`.
    ///
    /// Nothing is opened until the first access. Must be called from within
    /// a Tokio runtime, which runs the debounce timer.
    pub fn open(options: StoreOptions) -> Result<Self> {
        let opener: BackendOpener =
            Arc::new(|path: &Path| -> Result<Box<dyn BlobBackend>> {
                Ok(Box::new(SqliteBackend::open(path)?))
            });
        Self::with_backend(options, opener)
    }

    /// Create a store whose backend is produced by `opener`
    pub fn with_backend(options: StoreOptions, opener: BackendOpener) -> Result<Self> {
        let shared = Arc::new(StoreShared {
            state: Mutex::new(StoreState {
                backend: None,
                directory: options.directory,
                path: None,
            }),
            opener,
            fallback_directory: options.fallback_directory,
            on_notice: options.on_notice,
        });

        let sink = Arc::clone(&shared);
        let queue = DebouncedWriteQueue::new(
            options.timing,
            move |batch: &HashMap<FingerprintKey, Vec<u8>>| sink.write_batch(batch),
            options.on_error,
        )?;

        Ok(Self {
            shared,
            queue,
            enabled: AtomicBool::new(options.enabled),
        })
    }

    /// Whether caching is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn caching on or off.
    ///
    /// An open database stays open and keeps its content; while disabled,
    /// lookups miss and saves are dropped.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether the backend is currently open
    pub fn is_open(&self) -> bool {
        lock(&self.shared.state).backend.is_some()
    }

    /// Database file of the open backend
    pub fn path(&self) -> Option<PathBuf> {
        lock(&self.shared.state).path.clone()
    }

    /// Look up a thumbnail.
    ///
    /// Falls back to writes that are queued but not yet flushed. The
    /// connection lock is held across both lookups, so a flush cannot
    /// commit in between and make the entry briefly invisible.
    pub fn load(&self, key: &FingerprintKey) -> Result<Option<Vec<u8>>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let mut state = lock(&self.shared.state);
        let backend = self.shared.ensure_open(&mut state)?;
        if let Some(blob) = backend.get(key)? {
            return Ok(Some(blob));
        }
        Ok(self.queue.try_peek(key))
    }

    /// Write a thumbnail immediately.
    ///
    /// Any older value still queued for the same key is discarded so it
    /// cannot overwrite this one later. A batch that is already being
    /// written is allowed to finish first.
    pub fn save(&self, key: &FingerprintKey, blob: &[u8]) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        self.queue.pause_flushes(|| {
            self.queue.forget(key);
            let mut state = lock(&self.shared.state);
            self.shared.ensure_open(&mut state)?.put(key, blob)
        })
    }

    /// Queue a thumbnail for the next debounced flush
    pub fn enqueue_save(&self, key: FingerprintKey, blob: Vec<u8>) {
        if !self.is_enabled() {
            return;
        }
        self.queue.enqueue(key, blob);
    }

    /// Write every queued thumbnail now
    pub fn flush(&self) -> Result<usize> {
        self.queue.flush()
    }

    /// Flush queued writes and close the backend.
    ///
    /// The next access reopens it.
    pub fn close(&self) -> Result<()> {
        self.queue.flush()?;
        let mut state = lock(&self.shared.state);
        if state.backend.take().is_some() {
            tracing::debug!("Closed thumbnail database");
        }
        Ok(())
    }

    /// Delete every thumbnail and the database file.
    ///
    /// Queued writes are discarded, and a batch being written when this is
    /// called is deleted along with the rest. The next access recreates an
    /// empty database with a fresh format marker.
    pub fn remove(&self) -> Result<()> {
        self.queue.pause_flushes(|| {
            let dropped = self.queue.clear();

            let mut state = lock(&self.shared.state);
            if let Some(backend) = state.backend.as_mut() {
                backend.delete_all()?;
            }
            state.backend = None;
            let path = self.shared.current_path(&state)?;
            state.path = None;

            for file in database_files(&path) {
                match std::fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::io(file, e)),
                }
            }

            tracing::info!(
                "Removed thumbnail cache {} ({dropped} queued writes dropped)",
                path.display()
            );
            Ok(())
        })
    }

    /// Move the database file into `new_dir`.
    ///
    /// Does nothing if `new_dir` is the current directory. The connection
    /// lock is held for the whole move, so no write can land in the old
    /// location once the move has started.
    pub fn move_directory(&self, new_dir: &Path) -> Result<()> {
        self.queue.flush()?;

        let mut state = lock(&self.shared.state);
        let old_path = self.shared.current_path(&state)?;
        let old_dir = old_path.parent().unwrap_or(Path::new(""));
        if paths::same_location(old_dir, new_dir) {
            state.directory = Some(new_dir.to_path_buf());
            return Ok(());
        }

        let new_path = paths::database_path(new_dir);
        if new_path.exists() {
            return Err(CacheError::DestinationExists(new_path));
        }

        state.backend = None;
        std::fs::create_dir_all(new_dir).map_err(|e| CacheError::io(new_dir, e))?;
        if old_path.exists() {
            move_file(&old_path, &new_path)?;
        }

        state.directory = Some(new_dir.to_path_buf());
        state.path = None;

        tracing::info!(
            "Moved thumbnail cache from {} to {}",
            old_path.display(),
            new_path.display()
        );
        Ok(())
    }

    /// Counts and paths for diagnostics
    pub fn stats(&self) -> Result<StoreStats> {
        let pending = self.queue.len();
        let mut state = lock(&self.shared.state);
        let backend = self.shared.ensure_open(&mut state)?;
        let records = backend.count()?;
        let format = backend.property("format")?;

        Ok(StoreStats {
            path: state.path.clone().unwrap_or_default(),
            enabled: self.is_enabled(),
            records,
            pending,
            format,
        })
    }
}

impl Drop for ThumbnailStore {
    fn drop(&mut self) {
        if let Err(e) = self.queue.flush() {
            tracing::error!("Failed to flush thumbnail cache on shutdown: {e}");
        }
    }
}

/// The database file plus the side files `SQLite` may leave next to it
fn database_files(path: &Path) -> Vec<PathBuf> {
    let mut files = vec![path.to_path_buf()];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }
    files
}

/// Rename, or copy and delete when crossing filesystems
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| CacheError::io(to, e))?;
    std::fs::remove_file(from).map_err(|e| CacheError::io(from, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::tempdir;

    fn key(name: &str) -> FingerprintKey {
        FingerprintKey::compute(name, 100, chrono::DateTime::from_timestamp(0, 0).unwrap(), "")
    }

    fn slow_timing() -> DebounceTiming {
        DebounceTiming {
            min_idle: Duration::from_secs(30),
            max_wait: Duration::from_secs(60),
        }
    }

    fn options_in(dir: &Path) -> StoreOptions {
        StoreOptions {
            directory: Some(dir.to_path_buf()),
            timing: slow_timing(),
            ..StoreOptions::default()
        }
    }

    #[derive(Default)]
    struct Spy {
        opens: AtomicUsize,
        calls: AtomicUsize,
        deletes: AtomicUsize,
        fail_writes: AtomicBool,
    }

    struct SpyBackend {
        spy: Arc<Spy>,
        blobs: HashMap<FingerprintKey, Vec<u8>>,
    }

    impl SpyBackend {
        fn touch(&self) -> Result<()> {
            self.spy.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn write_allowed(&self) -> Result<()> {
            self.touch()?;
            if self.spy.fail_writes.load(Ordering::SeqCst) {
                return Err(CacheError::io(
                    "spy",
                    std::io::Error::other("disk full"),
                ));
            }
            Ok(())
        }
    }

    impl BlobBackend for SpyBackend {
        fn get(&self, key: &FingerprintKey) -> Result<Option<Vec<u8>>> {
            self.touch()?;
            Ok(self.blobs.get(key).cloned())
        }

        fn put(&mut self, key: &FingerprintKey, blob: &[u8]) -> Result<()> {
            self.write_allowed()?;
            self.blobs.insert(*key, blob.to_vec());
            Ok(())
        }

        fn put_batch(
            &mut self,
            entries: &mut dyn Iterator<Item = (&FingerprintKey, &[u8])>,
        ) -> Result<usize> {
            self.write_allowed()?;
            let mut written = 0;
            for (key, blob) in entries {
                self.blobs.insert(*key, blob.to_vec());
                written += 1;
            }
            Ok(written)
        }

        fn delete_all(&mut self) -> Result<()> {
            self.touch()?;
            self.spy.deletes.fetch_add(1, Ordering::SeqCst);
            self.blobs.clear();
            Ok(())
        }

        fn property(&self, _name: &str) -> Result<Option<String>> {
            self.touch()?;
            Ok(None)
        }

        fn count(&self) -> Result<u64> {
            self.touch()?;
            Ok(self.blobs.len() as u64)
        }
    }

    fn spy_store(options: StoreOptions) -> (ThumbnailStore, Arc<Spy>) {
        let spy = Arc::new(Spy::default());
        let s = Arc::clone(&spy);
        let opener: BackendOpener = Arc::new(move |_: &Path| -> Result<Box<dyn BlobBackend>> {
            s.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SpyBackend {
                spy: Arc::clone(&s),
                blobs: HashMap::new(),
            }))
        });
        (ThumbnailStore::with_backend(options, opener).unwrap(), spy)
    }

    #[tokio::test]
    async fn test_opens_lazily() {
        let dir = tempdir().unwrap();
        let store = ThumbnailStore::open(options_in(dir.path())).unwrap();
        assert!(!store.is_open());
        assert!(store.path().is_none());

        assert_eq!(store.load(&key("a")).unwrap(), None);
        assert!(store.is_open());
        assert_eq!(
            store.path().unwrap(),
            dir.path().join(paths::DATABASE_FILE)
        );
    }

    #[tokio::test]
    async fn test_enqueued_save_is_readable_before_flush() {
        let dir = tempdir().unwrap();
        let store = ThumbnailStore::open(options_in(dir.path())).unwrap();
        let k = key("page-1");

        store.enqueue_save(k, b"pixels".to_vec());
        assert_eq!(store.load(&k).unwrap().as_deref(), Some(&b"pixels"[..]));
        assert_eq!(store.stats().unwrap().records, 0);
    }

    #[tokio::test]
    async fn test_flushed_save_survives_reopen() {
        let dir = tempdir().unwrap();
        let k = key("page-2");
        {
            let store = ThumbnailStore::open(options_in(dir.path())).unwrap();
            store.enqueue_save(k, b"durable".to_vec());
            assert_eq!(store.flush().unwrap(), 1);
        }

        let store = ThumbnailStore::open(options_in(dir.path())).unwrap();
        assert_eq!(store.load(&k).unwrap().as_deref(), Some(&b"durable"[..]));
    }

    #[tokio::test]
    async fn test_background_flush_after_max_wait() {
        let dir = tempdir().unwrap();
        let store = ThumbnailStore::open(StoreOptions {
            timing: DebounceTiming {
                min_idle: Duration::from_millis(20),
                max_wait: Duration::from_millis(50),
            },
            ..options_in(dir.path())
        })
        .unwrap();

        store.enqueue_save(key("bg"), b"x".to_vec());
        tokio::time::sleep(Duration::from_millis(400)).await;

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.records, 1);
    }

    #[tokio::test]
    async fn test_disabled_store_does_no_io() {
        let (store, spy) = spy_store(StoreOptions {
            enabled: false,
            timing: slow_timing(),
            ..StoreOptions::default()
        });
        let k = key("off");

        assert_eq!(store.load(&k).unwrap(), None);
        store.save(&k, b"a").unwrap();
        store.enqueue_save(k, b"b".to_vec());
        assert_eq!(store.flush().unwrap(), 0);

        assert_eq!(spy.opens.load(Ordering::SeqCst), 0);
        assert_eq!(spy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_toggling_enabled_preserves_content() {
        let dir = tempdir().unwrap();
        let store = ThumbnailStore::open(options_in(dir.path())).unwrap();
        let k = key("toggle");
        store.save(&k, b"kept").unwrap();

        store.set_enabled(false);
        assert_eq!(store.load(&k).unwrap(), None);
        store.save(&k, b"ignored").unwrap();
        assert!(store.is_open());

        store.set_enabled(true);
        assert_eq!(store.load(&k).unwrap().as_deref(), Some(&b"kept"[..]));
    }

    #[tokio::test]
    async fn test_sync_save_wins_over_older_queued_value() {
        let dir = tempdir().unwrap();
        let store = ThumbnailStore::open(options_in(dir.path())).unwrap();
        let k = key("rebuild");

        store.enqueue_save(k, b"old".to_vec());
        store.save(&k, b"new").unwrap();
        store.flush().unwrap();

        assert_eq!(store.load(&k).unwrap().as_deref(), Some(&b"new"[..]));
    }

    #[tokio::test]
    async fn test_sync_save_wins_over_batch_in_flight() {
        let dir = tempdir().unwrap();
        let store = ThumbnailStore::open(options_in(dir.path())).unwrap();
        let k = key("in-flight");
        store.enqueue_save(k, b"old".to_vec());

        std::thread::scope(|s| {
            // Hold the connection so the flush stalls with its batch in flight
            let guard = lock(&store.shared.state);
            let flusher = s.spawn(|| store.flush());
            std::thread::sleep(Duration::from_millis(50));
            let saver = s.spawn(|| store.save(&k, b"new"));
            std::thread::sleep(Duration::from_millis(50));
            drop(guard);

            flusher.join().unwrap().unwrap();
            saver.join().unwrap().unwrap();
        });

        assert_eq!(store.load(&k).unwrap().as_deref(), Some(&b"new"[..]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_workers_read_their_last_write() {
        let dir = tempdir().unwrap();
        let store = ThumbnailStore::open(StoreOptions {
            timing: DebounceTiming {
                min_idle: Duration::from_millis(5),
                max_wait: Duration::from_millis(20),
            },
            ..options_in(dir.path())
        })
        .unwrap();

        std::thread::scope(|s| {
            for t in 0..4 {
                let store = &store;
                s.spawn(move || {
                    for round in 0..5 {
                        for i in 0..40 {
                            let k = key(&format!("{t}-{i}"));
                            let blob = format!("{t}-{i}-{round}").into_bytes();
                            if (i + round) % 3 == 0 {
                                store.save(&k, &blob).unwrap();
                            } else {
                                store.enqueue_save(k, blob);
                            }
                            assert!(store.load(&k).unwrap().is_some());
                        }
                    }
                });
            }
        });
        store.flush().unwrap();

        for t in 0..4 {
            for i in 0..40 {
                let expected = format!("{t}-{i}-4").into_bytes();
                assert_eq!(store.load(&key(&format!("{t}-{i}"))).unwrap(), Some(expected));
            }
        }
        let stats = store.stats().unwrap();
        assert_eq!(stats.records, 160);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_missing_directory_falls_back_with_notice() {
        let fallback = tempdir().unwrap();
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        let hook: NoticeHook = Arc::new(move |notice: &StoreNotice| {
            sink.lock().unwrap().push(notice.clone());
        });
        let missing = fallback.path().join("does-not-exist");

        let store = ThumbnailStore::open(StoreOptions {
            directory: Some(missing.clone()),
            fallback_directory: Some(fallback.path().to_path_buf()),
            on_notice: Some(hook),
            timing: slow_timing(),
            ..StoreOptions::default()
        })
        .unwrap();

        store.save(&key("a"), b"a").unwrap();
        assert_eq!(
            store.path().unwrap(),
            fallback.path().join(paths::DATABASE_FILE)
        );
        assert_eq!(
            notices.lock().unwrap().as_slice(),
            &[StoreNotice::DirectoryFallback {
                requested: missing,
                fallback: fallback.path().to_path_buf(),
            }]
        );
    }

    #[tokio::test]
    async fn test_remove_deletes_file_and_recreates_empty() {
        let dir = tempdir().unwrap();
        let store = ThumbnailStore::open(options_in(dir.path())).unwrap();
        let k = key("gone");
        store.save(&k, b"a").unwrap();
        store.enqueue_save(key("queued"), b"b".to_vec());
        let path = store.path().unwrap();

        store.remove().unwrap();
        assert!(!path.exists());
        assert!(!store.is_open());

        assert_eq!(store.load(&k).unwrap(), None);
        let stats = store.stats().unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.format.as_deref(), Some(crate::backend::FORMAT_VERSION));
    }

    #[tokio::test]
    async fn test_remove_discards_batch_in_flight() {
        let dir = tempdir().unwrap();
        let store = ThumbnailStore::open(options_in(dir.path())).unwrap();
        let k = key("cleared");
        store.enqueue_save(k, b"stale".to_vec());

        std::thread::scope(|s| {
            let guard = lock(&store.shared.state);
            let flusher = s.spawn(|| store.flush());
            std::thread::sleep(Duration::from_millis(50));
            let remover = s.spawn(|| store.remove());
            std::thread::sleep(Duration::from_millis(50));
            drop(guard);

            flusher.join().unwrap().unwrap();
            remover.join().unwrap().unwrap();
        });

        assert_eq!(store.load(&k).unwrap(), None);
        assert_eq!(store.stats().unwrap().records, 0);
    }

    #[tokio::test]
    async fn test_remove_clears_open_backend() {
        let dir = tempdir().unwrap();
        let (store, spy) = spy_store(options_in(dir.path()));
        store.save(&key("a"), b"a").unwrap();

        store.remove().unwrap();

        assert_eq!(spy.deletes.load(Ordering::SeqCst), 1);
        assert!(!store.is_open());
        assert_eq!(store.load(&key("a")).unwrap(), None);
        assert_eq!(spy.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_move_directory_relocates_file() {
        let old = tempdir().unwrap();
        let new = tempdir().unwrap();
        let target = new.path().join("thumbs");
        let store = ThumbnailStore::open(options_in(old.path())).unwrap();
        let k = key("moved");
        store.save(&k, b"a").unwrap();
        store.enqueue_save(key("pending"), b"b".to_vec());

        store.move_directory(&target).unwrap();

        assert!(!old.path().join(paths::DATABASE_FILE).exists());
        assert!(target.join(paths::DATABASE_FILE).exists());
        assert_eq!(store.load(&k).unwrap().as_deref(), Some(&b"a"[..]));
        assert_eq!(store.stats().unwrap().records, 2);
        assert_eq!(store.path().unwrap(), target.join(paths::DATABASE_FILE));
    }

    #[tokio::test]
    async fn test_move_to_same_directory_is_noop() {
        let dir = tempdir().unwrap();
        let store = ThumbnailStore::open(options_in(dir.path())).unwrap();
        store.save(&key("a"), b"a").unwrap();

        store.move_directory(&dir.path().join(".")).unwrap();

        assert!(store.is_open());
        assert!(dir.path().join(paths::DATABASE_FILE).exists());
    }

    #[tokio::test]
    async fn test_move_refuses_to_overwrite() {
        let old = tempdir().unwrap();
        let new = tempdir().unwrap();
        std::fs::write(new.path().join(paths::DATABASE_FILE), b"").unwrap();
        let store = ThumbnailStore::open(options_in(old.path())).unwrap();
        store.save(&key("a"), b"a").unwrap();

        let result = store.move_directory(new.path());
        assert!(matches!(result, Err(CacheError::DestinationExists(_))));
        assert_eq!(store.load(&key("a")).unwrap().as_deref(), Some(&b"a"[..]));
        assert!(old.path().join(paths::DATABASE_FILE).exists());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_entries_readable() {
        let dir = tempdir().unwrap();
        let (store, spy) = spy_store(options_in(dir.path()));
        let k = key("retry");
        spy.fail_writes.store(true, Ordering::SeqCst);

        store.enqueue_save(k, b"a".to_vec());
        assert!(store.flush().is_err());
        assert_eq!(store.load(&k).unwrap().as_deref(), Some(&b"a"[..]));

        spy.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(store.flush().unwrap(), 1);
        assert_eq!(store.stats().unwrap().records, 1);
    }
}
