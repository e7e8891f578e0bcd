//! Cross-session name store mirrored to durable storage.
//!
//! The blob is a JSON array of `[key, {name, timestamp}]` pairs ordered
//! from least to most recently used. It is read once at startup and
//! written back on a debounce timer after mutations.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::ResolveKey;
use crate::cache::{CacheEntry, Lookup, ResolutionCache, Ttls};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable per-origin blob storage.
pub trait Storage: Send + Sync {
    fn load(&self) -> Result<Option<String>, StorageError>;
    fn save(&self, blob: &str) -> Result<(), StorageError>;
}

/// Stores the blob in a single file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, blob: &str) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Keeps the blob in memory. Useful for tests and for sessions where
/// nothing should touch the disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blob: Mutex<Option<String>>,
    saves: Mutex<usize>,
}

impl MemoryStorage {
    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
            saves: Mutex::new(0),
        }
    }

    /// Last saved (or seeded) blob.
    pub fn blob(&self) -> Option<String> {
        self.blob.lock().ok().and_then(|b| b.clone())
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<Option<String>, StorageError> {
        Ok(self.blob())
    }

    fn save(&self, blob: &str) -> Result<(), StorageError> {
        if let Ok(mut slot) = self.blob.lock() {
            *slot = Some(blob.to_string());
        }
        if let Ok(mut n) = self.saves.lock() {
            *n += 1;
        }
        Ok(())
    }
}

/// Positive entries worth keeping across sessions.
pub struct PersistentStore {
    entries: ResolutionCache,
}

impl PersistentStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: ResolutionCache::new(capacity),
        }
    }

    /// Read the blob from `storage`, dropping expired, negative and
    /// malformed entries. Any storage or parse error yields an empty store.
    pub fn load(storage: &dyn Storage, capacity: usize, now: i64, ttls: Ttls) -> Self {
        let blob = match storage.load() {
            Ok(Some(blob)) => blob,
            Ok(None) => return Self::new(capacity),
            Err(e) => {
                tracing::debug!(error = %e, "Persisted name cache unreadable, starting empty");
                return Self::new(capacity);
            }
        };
        match Self::from_blob(&blob, capacity, now, ttls) {
            Ok(store) => {
                tracing::debug!(count = store.len(), "Persisted name cache loaded");
                store
            }
            Err(e) => {
                tracing::debug!(error = %e, "Persisted name cache malformed, starting empty");
                Self::new(capacity)
            }
        }
    }

    pub fn from_blob(
        blob: &str,
        capacity: usize,
        now: i64,
        ttls: Ttls,
    ) -> Result<Self, StorageError> {
        let pairs: Vec<(String, CacheEntry)> = serde_json::from_str(blob)?;
        let mut store = Self::new(capacity);
        for (raw_key, entry) in pairs {
            let Ok(key) = raw_key.parse::<ResolveKey>() else {
                continue;
            };
            if entry.name.is_none() || !entry.is_live(now, ttls) {
                continue;
            }
            store.entries.insert(key, entry);
        }
        Ok(store)
    }

    pub fn to_blob(&self) -> Result<String, StorageError> {
        let pairs: Vec<(&ResolveKey, &CacheEntry)> = self.entries.iter_lru().collect();
        Ok(serde_json::to_string(&pairs)?)
    }

    /// Live positive name for `key`, refreshing its recency.
    pub fn get(&mut self, key: &ResolveKey, now: i64, ttls: Ttls) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        match entry.lookup(now, ttls) {
            Lookup::Hit(_) => Some(entry.clone()),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: ResolveKey, name: String, now: i64) {
        self.entries.set(key, Some(name), now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Background task writing snapshots after mutations settle.
pub struct PersistWriter {
    notify: Arc<Notify>,
    dirty: Arc<AtomicBool>,
    storage: Arc<dyn Storage>,
}

impl PersistWriter {
    /// Start the writer. `snapshot` renders the current blob; it is called
    /// from the writer task once per debounce window.
    pub fn spawn<F>(
        storage: Arc<dyn Storage>,
        debounce: Duration,
        cancel: CancellationToken,
        snapshot: F,
    ) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let dirty = Arc::new(AtomicBool::new(false));
        tokio::spawn(write_loop(
            storage.clone(),
            notify.clone(),
            dirty.clone(),
            debounce,
            cancel,
            snapshot,
        ));
        Self {
            notify,
            dirty,
            storage,
        }
    }

    /// Record that the store changed.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Write `blob` immediately, bypassing the debounce.
    pub fn flush_now(&self, blob: &str) {
        self.dirty.store(false, Ordering::Release);
        save_quietly(self.storage.as_ref(), blob);
    }
}

async fn write_loop<F>(
    storage: Arc<dyn Storage>,
    notify: Arc<Notify>,
    dirty: Arc<AtomicBool>,
    debounce: Duration,
    cancel: CancellationToken,
    snapshot: F,
) where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = notify.notified() => {}
        }
        // Mutations arriving during the window coalesce into this write.
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(debounce) => {}
        }
        if dirty.swap(false, Ordering::AcqRel) {
            if let Some(blob) = snapshot() {
                let storage = storage.clone();
                let saved =
                    tokio::task::spawn_blocking(move || save_quietly(storage.as_ref(), &blob));
                if let Err(e) = saved.await {
                    tracing::debug!(error = %e, "Persist task failed");
                }
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }
    tracing::debug!("Persist writer stopped");
}

fn save_quietly(storage: &dyn Storage, blob: &str) {
    if let Err(e) = storage.save(blob) {
        tracing::debug!(error = %e, "Persisting name cache failed; continuing memory-only");
    }
}
