//! Batched candidate discovery over added subtrees.

use std::collections::HashSet;
use std::sync::Arc;

use crate::dom::{Element, NodeId, descendants};

/// Decides whether an element is an author label worth extracting from.
pub type CandidateMatcher<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

const AUTHOR_IDS: [&str; 2] = ["author-name", "author-text"];

/// Matches the chat renderer's author label elements.
pub fn default_matcher<E: Element>() -> CandidateMatcher<E> {
    Arc::new(|el: &E| {
        el.attribute("id")
            .is_some_and(|id| AUTHOR_IDS.contains(&id.as_str()))
    })
}

/// Collects added nodes until the next flush.
pub struct Scanner<E> {
    matcher: CandidateMatcher<E>,
    pending: Vec<E>,
    queued: HashSet<NodeId>,
}

impl<E: Element> Default for Scanner<E> {
    fn default() -> Self {
        Self::new(default_matcher())
    }
}

impl<E: Element> Scanner<E> {
    pub fn new(matcher: CandidateMatcher<E>) -> Self {
        Self {
            matcher,
            pending: Vec::new(),
            queued: HashSet::new(),
        }
    }

    /// Queue an added subtree root; repeats within a batch are dropped.
    pub fn push(&mut self, root: E) {
        if self.queued.insert(root.node_id()) {
            self.pending.push(root);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take the batch and return its distinct candidates in document order.
    pub fn drain(&mut self) -> Vec<E> {
        self.queued.clear();
        let roots = std::mem::take(&mut self.pending);
        self.candidates(&roots)
    }

    /// Candidates within `roots`.
    ///
    /// A root that matches itself is taken as-is without walking its
    /// subtree; otherwise every matching descendant is collected.
    pub fn candidates(&self, roots: &[E]) -> Vec<E> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for root in roots {
            if (self.matcher)(root) {
                if seen.insert(root.node_id()) {
                    out.push(root.clone());
                }
                continue;
            }
            for el in descendants(root) {
                if (self.matcher)(&el) && seen.insert(el.node_id()) {
                    out.push(el);
                }
            }
        }
        out
    }
}
