//! Resolve-key extraction from author elements.

use std::borrow::Cow;
use std::sync::LazyLock;

use name_resolver::ResolveKey;
use regex::Regex;

use crate::dom::{Element, closest, first_descendant};

static RE_HREF_CHANNEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/channel/(UC[^/?#]+)").unwrap());

static RE_HREF_HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/@([^/?#]+)").unwrap());

/// Whether visible text looks like a bare handle label.
///
/// The text must start with `@` once trimmed; an `@` later in the string
/// does not count.
pub fn is_handle_text(text: &str) -> bool {
    ResolveKey::handle(text).is_some()
}

/// A named way of turning an element into a key.
pub struct ExtractionStrategy<E> {
    pub name: &'static str,
    pub extract: fn(&E) -> Option<ResolveKey>,
}

impl<E> Clone for ExtractionStrategy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for ExtractionStrategy<E> {}

impl<E> std::fmt::Debug for ExtractionStrategy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionStrategy")
            .field("name", &self.name)
            .finish()
    }
}

/// Ordered list of strategies; the first one yielding a key wins, later
/// distinct keys serve as fallbacks.
#[derive(Clone, Debug)]
pub struct HandleExtractor<E> {
    strategies: Vec<ExtractionStrategy<E>>,
}

impl<E: Element> Default for HandleExtractor<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element> HandleExtractor<E> {
    /// Renderer channel id, link channel id, link handle, visible text.
    pub fn new() -> Self {
        Self::with_strategies(vec![
            ExtractionStrategy {
                name: "renderer-channel-id",
                extract: from_renderer_channel_id::<E>,
            },
            ExtractionStrategy {
                name: "link-channel-id",
                extract: from_link_channel_id::<E>,
            },
            ExtractionStrategy {
                name: "link-handle",
                extract: from_link_handle::<E>,
            },
            ExtractionStrategy {
                name: "text-handle",
                extract: from_text::<E>,
            },
        ])
    }

    pub fn with_strategies(strategies: Vec<ExtractionStrategy<E>>) -> Self {
        Self { strategies }
    }

    /// Insert a strategy ahead of the existing ones.
    pub fn prepend(&mut self, strategy: ExtractionStrategy<E>) {
        self.strategies.insert(0, strategy);
    }

    pub fn push(&mut self, strategy: ExtractionStrategy<E>) {
        self.strategies.push(strategy);
    }

    /// Key for `el` and the name of the strategy that produced it.
    pub fn extract(&self, el: &E) -> Option<(ResolveKey, &'static str)> {
        self.strategies
            .iter()
            .find_map(|s| (s.extract)(el).map(|key| (key, s.name)))
    }

    /// Every distinct key for `el` in strategy order.
    pub fn candidates(&self, el: &E) -> Vec<(ResolveKey, &'static str)> {
        let mut out: Vec<(ResolveKey, &'static str)> = Vec::new();
        for s in &self.strategies {
            if let Some(key) = (s.extract)(el) {
                if !out.iter().any(|(k, _)| *k == key) {
                    out.push((key, s.name));
                }
            }
        }
        out
    }
}

const CHANNEL_ID_ATTRS: [&str; 2] = [
    "author-external-channel-id",
    "data-author-external-channel-id",
];

fn is_chat_renderer<E: Element>(el: &E) -> bool {
    let tag = el.tag_name();
    tag.starts_with("yt-live-chat-") && tag.ends_with("-renderer")
}

fn is_profile_anchor<E: Element>(el: &E) -> bool {
    el.tag_name() == "a"
        && el
            .attribute("href")
            .is_some_and(|href| href.contains("/channel/UC") || href.contains("/@"))
}

/// Profile link for `el`: itself, an enclosing one, or one inside it.
fn nearby_anchor<E: Element>(el: &E) -> Option<E> {
    closest(el, is_profile_anchor).or_else(|| first_descendant(el, is_profile_anchor))
}

fn nearby_href<E: Element>(el: &E) -> Option<String> {
    nearby_anchor(el)?.attribute("href")
}

fn decode(segment: &str) -> Cow<'_, str> {
    urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment))
}

fn from_renderer_channel_id<E: Element>(el: &E) -> Option<ResolveKey> {
    let renderer = closest(el, is_chat_renderer)?;
    CHANNEL_ID_ATTRS
        .iter()
        .filter_map(|attr| renderer.attribute(attr))
        .find_map(|id| ResolveKey::channel_id(&id))
}

fn from_link_channel_id<E: Element>(el: &E) -> Option<ResolveKey> {
    let href = nearby_href(el)?;
    let id = RE_HREF_CHANNEL.captures(&href)?.get(1)?.as_str();
    ResolveKey::channel_id(&decode(id))
}

fn from_link_handle<E: Element>(el: &E) -> Option<ResolveKey> {
    let href = nearby_href(el)?;
    let handle = RE_HREF_HANDLE.captures(&href)?.get(1)?.as_str();
    ResolveKey::handle(&format!("@{}", decode(handle)))
}

fn from_text<E: Element>(el: &E) -> Option<ResolveKey> {
    let text = el.text_content();
    if !is_handle_text(&text) {
        return None;
    }
    ResolveKey::handle(text.trim())
}
