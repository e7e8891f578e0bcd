use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use name_resolver::parse::extract_display_name;
use name_resolver::{ResolveError, ResolverConfig};

use super::*;
use crate::dom::{MemoryDocument, MemoryElement};

enum Page {
    Body(String),
    Hang,
}

#[derive(Default)]
struct MockState {
    pages: HashMap<String, Page>,
    calls: Mutex<HashMap<String, usize>>,
}

/// Serves canned profile pages keyed by handle.
#[derive(Clone, Default)]
struct MockSource(Arc<MockState>);

impl MockSource {
    fn new(pages: Vec<(&str, Page)>) -> Self {
        Self(Arc::new(MockState {
            pages: pages
                .into_iter()
                .map(|(handle, page)| (handle.to_string(), page))
                .collect(),
            calls: Mutex::default(),
        }))
    }

    fn calls(&self, handle: &str) -> usize {
        self.0.calls.lock().unwrap().get(handle).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.0.calls.lock().unwrap().values().sum()
    }
}

#[async_trait::async_trait]
impl NameSource for MockSource {
    async fn lookup(
        &self,
        key: &ResolveKey,
        _cancel: &CancellationToken,
    ) -> Result<String, ResolveError> {
        *self
            .0
            .calls
            .lock()
            .unwrap()
            .entry(key.as_str().to_string())
            .or_default() += 1;
        tokio::time::sleep(Duration::from_millis(50)).await;

        match self.0.pages.get(key.as_str()) {
            Some(Page::Body(body)) => extract_display_name(body, key, |n| n == "YouTube"),
            Some(Page::Hang) => std::future::pending().await,
            None => Err(ResolveError::NotFound),
        }
    }
}

fn profile(title: &str) -> Page {
    Page::Body(format!(
        "<html><head><meta property=\"og:title\" content=\"{title}\"></head>"
    ))
}

fn test_config() -> ResolverConfig {
    ResolverConfig {
        min_request_spacing_ms: 0,
        retry_count: 0,
        fetch_timeout_ms: 1_000,
        container_poll_ms: 100,
        ..ResolverConfig::default()
    }
}

fn restorer(source: &MockSource) -> NameRestorer<MemoryElement, MockSource> {
    restorer_with(source, test_config())
}

fn restorer_with(
    source: &MockSource,
    config: ResolverConfig,
) -> NameRestorer<MemoryElement, MockSource> {
    let resolver = ResolverService::new(config, source.clone());
    NameRestorer::new(resolver, RestorerOptions::default())
}

fn feed(title: &str) -> Page {
    Page::Body(format!("<feed><title>{title}</title><entry></entry></feed>"))
}

const CHANNEL: &str = "UCabcdefghijklmnopqrstuv";

fn chat_page() -> (MemoryDocument, MemoryElement) {
    let doc = MemoryDocument::new();
    let container = MemoryElement::new("div").with_attr("id", "chat");
    doc.root().append_child(&container);
    (doc, container)
}

/// Append a chat row and return its author label.
fn add_row(container: &MemoryElement, author: &str) -> MemoryElement {
    let label = MemoryElement::new("span")
        .with_attr("id", "author-name")
        .with_text(author);
    let row = MemoryElement::new("div")
        .with_child(label.clone())
        .with_child(MemoryElement::new("span").with_text("hello chat"));
    container.append_child(&row);
    label
}

fn key(handle: &str) -> ResolveKey {
    ResolveKey::Handle(handle.into())
}

#[tokio::test(start_paused = true)]
async fn restores_display_name_and_keeps_handle_in_title() {
    let source = MockSource::new(vec![(
        "@example_handle",
        profile("Example Display Name - YouTube"),
    )]);
    let mut restorer = restorer(&source);
    let (_doc, container) = chat_page();
    let label = add_row(&container, "@example_handle");

    restorer.observe(container.clone());
    restorer.settle().await;

    assert_eq!(label.text_content(), "Example Display Name");
    assert_eq!(label.attribute("title").as_deref(), Some("@example_handle"));
    assert_eq!(source.calls("@example_handle"), 1);
    let stats = restorer.stats();
    assert_eq!(stats.registered, 1);
    assert_eq!(stats.resolved, 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_handles_in_one_batch_share_a_fetch() {
    let source = MockSource::new(vec![("@dup_handle", profile("Dup Person - YouTube"))]);
    let mut restorer = restorer(&source);
    let (_doc, container) = chat_page();
    let first = add_row(&container, "@dup_handle");
    let second = add_row(&container, "@dup_handle");

    restorer.observe(container.clone());
    restorer.flush();
    assert_eq!(restorer.pending(), 2);
    restorer.settle().await;

    assert_eq!(source.calls("@dup_handle"), 1);
    assert_eq!(first.text_content(), "Dup Person");
    assert_eq!(second.text_content(), "Dup Person");
    assert_eq!(restorer.stats().resolved, 2);
}

#[tokio::test(start_paused = true)]
async fn timed_out_handle_stays_visible_and_is_not_refetched() {
    let source = MockSource::new(vec![("@broken_handle", Page::Hang)]);
    let mut restorer = restorer(&source);
    let (_doc, container) = chat_page();
    let first = add_row(&container, "@broken_handle");

    restorer.observe(container.clone());
    restorer.settle().await;
    assert_eq!(first.text_content(), "@broken_handle");
    assert!(first.attribute("title").is_none());
    let calls = source.calls("@broken_handle");
    assert_eq!(calls, 1);

    let again = add_row(&container, "@broken_handle");
    restorer.observe(again.clone());
    restorer.settle().await;

    assert_eq!(again.text_content(), "@broken_handle");
    assert_eq!(source.calls("@broken_handle"), calls);
    assert_eq!(restorer.stats().fallback, 2);
}

#[tokio::test(start_paused = true)]
async fn detached_element_is_not_written_but_cache_is_filled() {
    let source = MockSource::new(vec![("@leaving", profile("Leaving Soon"))]);
    let mut restorer = restorer(&source);
    let (_doc, container) = chat_page();
    let label = add_row(&container, "@leaving");

    restorer.observe(label.clone());
    restorer.flush();
    assert_eq!(restorer.pending(), 1);
    container.set_text_content("");

    restorer.settle().await;
    assert_eq!(label.text_content(), "@leaving");
    assert_eq!(restorer.stats().abandoned, 1);
    assert_eq!(
        restorer.resolver().peek(&key("@leaving")),
        Lookup::Hit("Leaving Soon".into())
    );
}

#[tokio::test(start_paused = true)]
async fn recycled_row_discards_stale_name() {
    let source = MockSource::new(vec![
        ("@first_author", profile("First Author")),
        ("@second_author", profile("Second Author")),
    ]);
    let mut restorer = restorer(&source);
    let (_doc, container) = chat_page();
    let label = add_row(&container, "@first_author");

    restorer.observe(label.clone());
    restorer.flush();
    label.set_text_content("@second_author");

    restorer.settle().await;
    assert_eq!(label.text_content(), "@second_author");
    assert_eq!(restorer.stats().abandoned, 1);

    // Observed again showing the new handle, it gets its own resolution.
    restorer.observe(label.clone());
    restorer.settle().await;
    assert_eq!(label.text_content(), "Second Author");
    assert_eq!(label.attribute("title").as_deref(), Some("@second_author"));
}

#[tokio::test(start_paused = true)]
async fn cached_names_are_written_during_flush() {
    let source = MockSource::new(vec![("@regular", profile("Regular Viewer"))]);
    let mut restorer = restorer(&source);
    let (_doc, container) = chat_page();

    restorer.observe(add_row(&container, "@regular"));
    restorer.settle().await;

    let later = add_row(&container, "@regular");
    restorer.observe(later.clone());
    restorer.flush();

    assert_eq!(later.text_content(), "Regular Viewer");
    assert_eq!(restorer.pending(), 0);
    assert_eq!(restorer.stats().fast_path, 1);
    assert_eq!(source.calls("@regular"), 1);
}

#[tokio::test(start_paused = true)]
async fn text_with_inner_marker_is_ignored() {
    let source = MockSource::default();
    let mut restorer = restorer(&source);
    let (_doc, container) = chat_page();
    let label = add_row(&container, "thanks @someone");

    restorer.observe(container.clone());
    restorer.settle().await;

    assert_eq!(label.text_content(), "thanks @someone");
    assert_eq!(restorer.stats().registered, 0);
    assert_eq!(source.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn pending_node_is_registered_once() {
    let source = MockSource::new(vec![("@steady", profile("Steady"))]);
    let mut restorer = restorer(&source);
    let (_doc, container) = chat_page();
    let label = add_row(&container, "@steady");

    restorer.observe(label.clone());
    restorer.flush();
    restorer.observe(label.clone());
    restorer.flush();
    restorer.observe(container.clone());
    restorer.settle().await;

    assert_eq!(restorer.stats().registered, 1);
    assert_eq!(source.calls("@steady"), 1);
    assert_eq!(label.text_content(), "Steady");
}

#[tokio::test(start_paused = true)]
async fn run_follows_container_and_batches_mutations() {
    let source = MockSource::new(vec![
        ("@early", profile("Early Bird")),
        ("@moved", profile("Moved Along")),
        ("@streamed", profile("Streamed In")),
        ("@outside", profile("Outside")),
    ]);
    let mut restorer = restorer(&source);
    let doc = MemoryDocument::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let locate_doc = doc.clone();
    let locate = move || locate_doc.get_element_by_id("chat");
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        restorer.run(rx, locate, run_cancel).await;
        restorer
    });

    // Container appears after startup and is picked up by the poll.
    let first = MemoryElement::new("div").with_attr("id", "chat");
    let early = add_row(&first, "@early");
    doc.root().append_child(&first);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(early.text_content(), "Early Bird");

    // Replaced wholesale, as on a chat mode switch.
    first.remove();
    let second = MemoryElement::new("div").with_attr("id", "chat");
    let moved = add_row(&second, "@moved");
    doc.root().append_child(&second);
    tx.send(DomEvent::Navigated).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(moved.text_content(), "Moved Along");

    // Incremental rows arrive through the mutation feed.
    let streamed = add_row(&second, "@streamed");
    tx.send(DomEvent::Added(streamed.clone())).unwrap();
    let outside = MemoryElement::new("span")
        .with_attr("id", "author-name")
        .with_text("@outside");
    doc.root().append_child(&outside);
    tx.send(DomEvent::Added(outside.clone())).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(streamed.text_content(), "Streamed In");
    assert_eq!(outside.text_content(), "@outside");

    cancel.cancel();
    let restorer = task.await.unwrap();
    let stats = restorer.stats();
    assert_eq!(stats.resolved, 3);
    assert_eq!(source.calls("@outside"), 0);
    assert_eq!(
        restorer.container().map(|c| c.node_id()),
        Some(second.node_id())
    );
}

#[tokio::test(start_paused = true)]
async fn finished_lookups_are_written_on_the_next_flush_in_run() {
    let source = MockSource::new(vec![("@batched", profile("Batched Name"))]);
    let config = ResolverConfig {
        scan_debounce_ms: 300,
        ..test_config()
    };
    let mut restorer = restorer_with(&source, config);
    let (_doc, container) = chat_page();
    let label = add_row(&container, "@batched");
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        restorer.run(rx, || None, run_cancel).await;
        restorer
    });
    tx.send(DomEvent::Added(label.clone())).unwrap();

    // Registered at the first flush, looked up within 50ms after it; the
    // name waits for the following flush instead of landing immediately.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(source.calls("@batched"), 1);
    assert_eq!(label.text_content(), "@batched");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(label.text_content(), "Batched Name");

    cancel.cancel();
    let restorer = task.await.unwrap();
    assert_eq!(restorer.stats().resolved, 1);
    assert!(restorer.stats().flushes >= 2);
}

#[tokio::test(start_paused = true)]
async fn failed_channel_id_falls_back_to_handle() {
    let source = MockSource::new(vec![("@has_name", profile("Has A Name - YouTube"))]);
    let mut restorer = restorer(&source);
    let (_doc, container) = chat_page();
    let label = MemoryElement::new("span")
        .with_attr("id", "author-name")
        .with_text("@has_name");
    let link = MemoryElement::new("a")
        .with_attr("href", &format!("/channel/{CHANNEL}"))
        .with_child(label.clone());
    container.append_child(&MemoryElement::new("div").with_child(link));

    restorer.observe(container.clone());
    restorer.settle().await;

    assert_eq!(label.text_content(), "Has A Name");
    assert_eq!(source.calls(CHANNEL), 1);
    assert_eq!(source.calls("@has_name"), 1);
    assert_eq!(restorer.stats().resolved, 1);
    assert_eq!(restorer.stats().fallback, 0);

    // A later row for the same author skips the known-bad id from cache.
    let again = MemoryElement::new("span")
        .with_attr("id", "author-name")
        .with_text("@has_name");
    let link = MemoryElement::new("a")
        .with_attr("href", &format!("/channel/{CHANNEL}"))
        .with_child(again.clone());
    container.append_child(&MemoryElement::new("div").with_child(link));
    restorer.observe(container.clone());
    restorer.flush();

    assert_eq!(again.text_content(), "Has A Name");
    assert_eq!(restorer.stats().fast_path, 1);
    assert_eq!(source.calls(CHANNEL), 1);
    assert_eq!(source.calls("@has_name"), 1);
}

#[tokio::test(start_paused = true)]
async fn renderer_channel_id_is_resolved_through_the_feed() {
    let source = MockSource::new(vec![(CHANNEL, feed("Feed Channel Name"))]);
    let mut restorer = restorer(&source);
    let (_doc, container) = chat_page();
    let label = MemoryElement::new("span")
        .with_attr("id", "author-name")
        .with_text("@renderer_handle");
    let renderer = MemoryElement::new("yt-live-chat-text-message-renderer")
        .with_attr("author-external-channel-id", CHANNEL)
        .with_child(label.clone());
    container.append_child(&renderer);

    restorer.observe(container.clone());
    restorer.settle().await;

    assert_eq!(label.text_content(), "Feed Channel Name");
    assert_eq!(label.attribute("title").as_deref(), Some("@renderer_handle"));
    assert_eq!(source.calls(CHANNEL), 1);
    assert_eq!(source.calls("@renderer_handle"), 0);
}
