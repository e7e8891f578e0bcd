//! Ties scanning, extraction, resolution and write-back together.

use std::collections::HashMap;
use std::time::Duration;

use name_resolver::{Lookup, NameSource, ResolveKey, ResolverService};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::KEY_MARKER_ATTR;
use crate::dom::{Element, is_inclusive_descendant};
use crate::extract::{HandleExtractor, is_handle_text};
use crate::lifecycle::{ContainerWatch, LifecycleEvent};
use crate::scanner::{CandidateMatcher, Scanner, default_matcher};
use crate::writer::{self, Binding, BindingState};

/// Mutation feed consumed by [`NameRestorer::run`].
#[derive(Debug, Clone)]
pub enum DomEvent<E> {
    /// A subtree was inserted.
    Added(E),
    /// The page navigated; the container should be located again.
    Navigated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestorerStats {
    /// Elements that left `Unseen`.
    pub registered: u64,
    pub resolved: u64,
    pub abandoned: u64,
    pub fallback: u64,
    /// Resolved synchronously from cache during a flush.
    pub fast_path: u64,
    pub flushes: u64,
}

/// Pluggable selector knowledge for a restorer.
pub struct RestorerOptions<E> {
    pub extractor: HandleExtractor<E>,
    pub matcher: CandidateMatcher<E>,
}

impl<E: Element> Default for RestorerOptions<E> {
    fn default() -> Self {
        Self {
            extractor: HandleExtractor::new(),
            matcher: default_matcher(),
        }
    }
}

type Completion = (ResolveKey, Option<String>);

/// Restores display names over `@handle` labels in a live element tree.
///
/// DOM reads and writes happen only inside [`flush`](Self::flush) and the
/// methods that call it; network resolution runs on spawned tasks and
/// reports back through a channel. Finished resolutions are buffered and
/// applied by the next flush.
pub struct NameRestorer<E, S> {
    resolver: ResolverService<S>,
    extractor: HandleExtractor<E>,
    scanner: Scanner<E>,
    container: ContainerWatch<E>,
    waiting: HashMap<ResolveKey, Vec<Binding<E>>>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    completed: Vec<Completion>,
    stats: RestorerStats,
}

impl<E: Element, S: NameSource> NameRestorer<E, S> {
    pub fn new(resolver: ResolverService<S>, options: RestorerOptions<E>) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            resolver,
            extractor: options.extractor,
            scanner: Scanner::new(options.matcher),
            container: ContainerWatch::new(),
            waiting: HashMap::new(),
            done_tx,
            done_rx,
            completed: Vec::new(),
            stats: RestorerStats::default(),
        }
    }

    pub fn resolver(&self) -> &ResolverService<S> {
        &self.resolver
    }

    pub fn stats(&self) -> RestorerStats {
        self.stats
    }

    /// Elements still waiting on a resolution.
    pub fn pending(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub fn container(&self) -> Option<&E> {
        self.container.current()
    }

    /// Queue an added subtree for the next flush.
    pub fn observe(&mut self, node: E) {
        self.scanner.push(node);
    }

    /// Register queued candidates and apply finished resolutions.
    pub fn flush(&mut self) {
        self.stats.flushes += 1;
        let mut candidates = self.scanner.drain();
        if let Some(container) = self.container.current() {
            candidates.retain(|el| is_inclusive_descendant(el, container));
        }
        for el in candidates {
            self.register(el);
        }
        while let Ok(done) = self.done_rx.try_recv() {
            self.completed.push(done);
        }
        for (key, name) in std::mem::take(&mut self.completed) {
            self.complete(key, name);
        }
    }

    /// Flush, then wait until every registered element reached a
    /// terminal state.
    pub async fn settle(&mut self) {
        self.flush();
        while !self.waiting.is_empty() {
            match self.done_rx.recv().await {
                Some(done) => {
                    self.completed.push(done);
                    self.flush();
                }
                None => break,
            }
        }
    }

    /// Feed the located container; rescans it when it (re)appears.
    pub fn check_container(&mut self, found: Option<E>) -> LifecycleEvent<E> {
        let event = self.container.check(found);
        if let LifecycleEvent::Attached(el) | LifecycleEvent::Replaced(el) = &event {
            self.observe(el.clone());
            self.flush();
        }
        event
    }

    /// Drive the restorer from a mutation feed until `cancel` fires or
    /// the feed closes.
    ///
    /// Added nodes and finished resolutions are batched for
    /// `scanDebounceMs`; `locate` is polled every `containerPollMs` and on
    /// navigation.
    pub async fn run<L>(
        &mut self,
        mut events: mpsc::UnboundedReceiver<DomEvent<E>>,
        mut locate: L,
        cancel: CancellationToken,
    ) where
        L: FnMut() -> Option<E>,
    {
        let debounce = self.resolver.config().scan_debounce();
        let mut poll = tokio::time::interval(self.resolver.config().container_poll());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let flush_timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(flush_timer);
        let mut armed = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(DomEvent::Added(node)) => {
                        self.observe(node);
                        if !armed {
                            flush_timer.as_mut().reset(Instant::now() + debounce);
                            armed = true;
                        }
                    }
                    Some(DomEvent::Navigated) => {
                        tracing::debug!("Navigation, relocating chat container");
                        self.check_container(locate());
                    }
                    None => break,
                },
                Some(done) = self.done_rx.recv() => {
                    self.completed.push(done);
                    if !armed {
                        flush_timer.as_mut().reset(Instant::now() + debounce);
                        armed = true;
                    }
                }
                _ = &mut flush_timer, if armed => {
                    armed = false;
                    self.flush();
                }
                _ = poll.tick() => {
                    self.check_container(locate());
                }
            }
        }
        self.flush();
        tracing::debug!(stats = ?self.stats, "Name restorer stopped");
    }

    fn register(&mut self, el: E) {
        if !is_handle_text(&el.text_content()) {
            return;
        }
        let mut candidates = self.extractor.candidates(&el).into_iter();
        let Some((key, strategy)) = candidates.next() else {
            return;
        };
        let marker = key.to_string();
        if el.attribute(KEY_MARKER_ATTR).as_deref() == Some(marker.as_str()) {
            return;
        }
        el.set_attribute(KEY_MARKER_ATTR, &marker);
        self.stats.registered += 1;
        tracing::trace!(key = %key, strategy, "Registered author label");

        let fallback = candidates.map(|(k, _)| k).collect();
        let binding = Binding::pending(el, key.clone()).with_fallback(fallback);
        self.dispatch(binding, key);
    }

    /// Resolve `binding` through `key`, moving on to its fallback keys
    /// while the cache reports them unresolvable.
    fn dispatch(&mut self, mut binding: Binding<E>, mut key: ResolveKey) {
        loop {
            match self.resolver.peek(&key) {
                Lookup::Hit(name) => {
                    self.stats.fast_path += 1;
                    let state = writer::apply(&mut binding, Some(&name));
                    self.record(state);
                    return;
                }
                Lookup::Negative => match binding.next_fallback() {
                    Some(next) => key = next,
                    None => {
                        let state = writer::apply(&mut binding, None);
                        self.record(state);
                        return;
                    }
                },
                Lookup::Miss => {
                    let waiters = self.waiting.entry(key.clone()).or_default();
                    waiters.push(binding);
                    if waiters.len() == 1 {
                        self.spawn_lookup(key);
                    }
                    return;
                }
            }
        }
    }

    fn spawn_lookup(&self, key: ResolveKey) {
        let resolver = self.resolver.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let name = resolver.resolve(&key).await;
            let _ = done.send((key, name));
        });
    }

    fn complete(&mut self, key: ResolveKey, name: Option<String>) {
        let Some(bindings) = self.waiting.remove(&key) else {
            return;
        };
        for mut binding in bindings {
            if name.is_none() && binding.is_current() {
                if let Some(next) = binding.next_fallback() {
                    tracing::trace!(from = %key, to = %next, "Trying fallback key");
                    self.dispatch(binding, next);
                    continue;
                }
            }
            let state = writer::apply(&mut binding, name.as_deref());
            self.record(state);
        }
    }

    fn record(&mut self, state: BindingState) {
        match state {
            BindingState::Resolved => self.stats.resolved += 1,
            BindingState::Abandoned => self.stats.abandoned += 1,
            BindingState::Fallback => self.stats.fallback += 1,
            BindingState::Unseen | BindingState::Pending => {}
        }
    }
}

#[cfg(test)]
mod tests;
