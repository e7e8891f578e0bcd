//! Cache-fronted, coalescing name resolver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::Shared;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::cache::{Lookup, ResolutionCache, Ttls};
use crate::config::ResolverConfig;
use crate::persist::{PersistWriter, PersistentStore, Storage};
use crate::queue::FetchQueue;
use crate::source::NameSource;
use crate::{ResolveError, ResolveKey};

/// Wall-clock source for cache timestamps.
pub trait Clock: Send + Sync + 'static {
    /// Current time in unix milliseconds.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

// A oneshot receiver wrapped in `Shared` so every waiter gets a clone of the
// single result. A dropped sender (queue shut down) reads as "no name".
type PendingName = Shared<oneshot::Receiver<Option<String>>>;

struct State {
    memory: ResolutionCache,
    persisted: Option<PersistentStore>,
    in_flight: HashMap<ResolveKey, PendingName>,
}

impl State {
    fn snapshot_blob(&self) -> Option<String> {
        let store = self.persisted.as_ref()?;
        match store.to_blob() {
            Ok(blob) => Some(blob),
            Err(e) => {
                tracing::debug!(error = %e, "Serializing name cache failed");
                None
            }
        }
    }
}

/// Counters exposed for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    pub cache_len: usize,
    pub persisted_len: usize,
    pub in_flight: usize,
    pub queued: usize,
    pub active: usize,
    pub peak_active: usize,
    pub fetches_started: u64,
    pub lookups: u64,
}

struct Inner<S> {
    config: ResolverConfig,
    ttls: Ttls,
    source: S,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<State>>,
    queue: FetchQueue,
    writer: Option<PersistWriter>,
    cancel: CancellationToken,
    lookups: AtomicU64,
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Resolves handles and channel ids to display names.
///
/// One instance per page context; clones share the same caches, queue and
/// in-flight table.
pub struct ResolverService<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ResolverService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Builder for [`ResolverService`].
pub struct ResolverBuilder<S> {
    config: ResolverConfig,
    source: S,
    storage: Option<Arc<dyn Storage>>,
    clock: Arc<dyn Clock>,
}

impl<S: NameSource> ResolverBuilder<S> {
    /// Mirror positive results to `storage` across sessions.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the service. Must be called inside a tokio runtime.
    pub fn build(self) -> ResolverService<S> {
        let config = self.config;
        let ttls = Ttls {
            positive_ms: i64::try_from(config.positive_ttl_ms).unwrap_or(i64::MAX),
            negative_ms: i64::try_from(config.negative_ttl_ms).unwrap_or(i64::MAX),
        };
        let cancel = CancellationToken::new();
        let now = self.clock.now_ms();

        let persisted = self
            .storage
            .as_deref()
            .map(|s| PersistentStore::load(s, config.persist_capacity, now, ttls));
        let state = Arc::new(Mutex::new(State {
            memory: ResolutionCache::new(config.cache_capacity),
            persisted,
            in_flight: HashMap::new(),
        }));

        let writer = self.storage.map(|storage| {
            let state = state.clone();
            PersistWriter::spawn(
                storage,
                config.persist_debounce(),
                cancel.child_token(),
                move || lock(&state).snapshot_blob(),
            )
        });

        let queue = FetchQueue::spawn(
            config.max_concurrency,
            config.min_request_spacing(),
            cancel.child_token(),
        );

        tracing::debug!(
            capacity = config.cache_capacity,
            max_concurrency = config.max_concurrency,
            persistent = writer.is_some(),
            "Name resolver started"
        );

        ResolverService {
            inner: Arc::new(Inner {
                config,
                ttls,
                source: self.source,
                clock: self.clock,
                state,
                queue,
                writer,
                cancel,
                lookups: AtomicU64::new(0),
            }),
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<S: NameSource> ResolverService<S> {
    /// Memory-only resolver using the system clock.
    pub fn new(config: ResolverConfig, source: S) -> Self {
        Self::builder(config, source).build()
    }

    pub fn builder(config: ResolverConfig, source: S) -> ResolverBuilder<S> {
        ResolverBuilder {
            config,
            source,
            storage: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.inner.config
    }

    /// Resolve `key` to a display name.
    ///
    /// Answers from cache when possible; otherwise joins the in-flight
    /// fetch for `key` or queues a new one. Every failure yields `None`.
    pub async fn resolve(&self, key: &ResolveKey) -> Option<String> {
        self.inner.lookups.fetch_add(1, Ordering::Relaxed);
        let pending = {
            let now = self.inner.clock.now_ms();
            let mut state = lock(&self.inner.state);
            if let Some(outcome) = self.cached(&mut state, key, now) {
                return outcome;
            }
            match state.in_flight.get(key) {
                Some(pending) => {
                    tracing::trace!(key = %key, "Joining in-flight lookup");
                    pending.clone()
                }
                None => {
                    let pending = self.start_fetch(key.clone());
                    state.in_flight.insert(key.clone(), pending.clone());
                    pending
                }
            }
        };
        pending.await.ok().flatten()
    }

    /// Cached outcome without fetching: `Hit`, `Negative`, or `Miss`.
    pub fn peek(&self, key: &ResolveKey) -> Lookup {
        let now = self.inner.clock.now_ms();
        let mut state = lock(&self.inner.state);
        match self.cached(&mut state, key, now) {
            Some(Some(name)) => Lookup::Hit(name),
            Some(None) => Lookup::Negative,
            None => Lookup::Miss,
        }
    }

    pub fn stats(&self) -> ResolverStats {
        let state = lock(&self.inner.state);
        let queue = &self.inner.queue;
        ResolverStats {
            cache_len: state.memory.len(),
            persisted_len: state.persisted.as_ref().map_or(0, PersistentStore::len),
            in_flight: state.in_flight.len(),
            queued: queue.queued(),
            active: queue.active(),
            peak_active: queue.peak_active(),
            fetches_started: queue.started(),
            lookups: self.inner.lookups.load(Ordering::Relaxed),
        }
    }

    /// Stop the fetch queue and write the persisted store once more.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(writer) = &self.inner.writer {
            let blob = lock(&self.inner.state).snapshot_blob();
            if let Some(blob) = blob {
                writer.flush_now(&blob);
            }
        }
        tracing::debug!("Name resolver shut down");
    }

    /// Cached outcome for `key`, if any. A live persisted name outranks a
    /// live negative in memory.
    fn cached(&self, state: &mut State, key: &ResolveKey, now: i64) -> Option<Option<String>> {
        let ttls = self.inner.ttls;
        let memory = state.memory.get(key).map(|e| e.lookup(now, ttls));
        if let Some(Lookup::Hit(name)) = memory {
            return Some(Some(name));
        }
        if let Some(entry) = state
            .persisted
            .as_mut()
            .and_then(|p| p.get(key, now, ttls))
        {
            let name = entry.name.clone();
            state.memory.insert(key.clone(), entry);
            tracing::trace!(key = %key, "Promoted persisted name");
            return Some(name);
        }
        if let Some(Lookup::Negative) = memory {
            return Some(None);
        }
        None
    }

    fn start_fetch(&self, key: ResolveKey) -> PendingName {
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let job = async move {
            let name = inner.fetch_with_retry(&key).await;
            inner.complete(&key, name.clone());
            let _ = tx.send(name);
        };
        if !self.inner.queue.submit(job.boxed()) {
            tracing::debug!("Fetch queue stopped; lookup will resolve to None");
        }
        rx.shared()
    }
}

impl<S: NameSource> Inner<S> {
    async fn fetch_with_retry(&self, key: &ResolveKey) -> Option<String> {
        let attempts = self.config.retry_count + 1;
        for attempt in 1..=attempts {
            let cancel = self.cancel.child_token();
            let result = match tokio::time::timeout(
                self.config.fetch_timeout(),
                self.source.lookup(key, &cancel),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    Err(ResolveError::Timeout)
                }
            };

            let err = match result {
                Ok(name) if self.config.is_placeholder(&name) => ResolveError::NotFound,
                Ok(name) => {
                    tracing::debug!(key = %key, name = %name, attempt, "Resolved display name");
                    return Some(name);
                }
                Err(e) => e,
            };

            if !err.is_transient() || attempt == attempts {
                tracing::debug!(key = %key, error = %err, attempt, "Lookup failed, caching negative");
                return None;
            }
            tracing::debug!(key = %key, error = %err, attempt, "Transient lookup failure, retrying");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.config.retry_delay()) => {}
            }
        }
        None
    }

    /// Record the outcome and retire the in-flight entry in one step, so a
    /// new caller sees either the pending fetch or the cached result.
    fn complete(&self, key: &ResolveKey, name: Option<String>) {
        let now = self.clock.now_ms();
        let mut state = lock(&self.state);
        if let (Some(name), Some(store)) = (&name, state.persisted.as_mut()) {
            store.insert(key.clone(), name.clone(), now);
            if let Some(writer) = &self.writer {
                writer.mark_dirty();
            }
        }
        if let Some(evicted) = state.memory.set(key.clone(), name, now) {
            tracing::trace!(evicted = %evicted, "Name cache full, evicted oldest");
        }
        state.in_flight.remove(key);
    }
}
