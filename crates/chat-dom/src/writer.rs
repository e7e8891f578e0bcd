//! Guarded write-back of resolved names.

use name_resolver::ResolveKey;

use crate::KEY_MARKER_ATTR;
use crate::dom::Element;

/// Where an observed element is in the restore lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unseen,
    /// Registered and waiting on a resolution.
    Pending,
    /// Text rewritten to the display name.
    Resolved,
    /// Detached or recycled before the name arrived; left untouched.
    Abandoned,
    /// No name could be resolved; the handle stays visible.
    Fallback,
}

impl BindingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Abandoned | Self::Fallback)
    }
}

/// An element registered for a key, with the text it showed at the time.
///
/// `key` is the key the element is marked with; `fallback` holds further
/// keys to try, in order, when a lookup comes back empty.
#[derive(Debug, Clone)]
pub struct Binding<E> {
    pub element: E,
    pub original_text: String,
    pub key: ResolveKey,
    pub fallback: Vec<ResolveKey>,
    pub state: BindingState,
}

impl<E: Element> Binding<E> {
    /// Register `element` under `key`, capturing its current text.
    pub fn pending(element: E, key: ResolveKey) -> Self {
        let original_text = element.text_content().trim().to_string();
        Self {
            element,
            original_text,
            key,
            fallback: Vec::new(),
            state: BindingState::Pending,
        }
    }

    pub fn with_fallback(mut self, keys: Vec<ResolveKey>) -> Self {
        self.fallback = keys;
        self
    }

    /// Take the next key to try after a failed lookup.
    pub fn next_fallback(&mut self) -> Option<ResolveKey> {
        if self.fallback.is_empty() {
            None
        } else {
            Some(self.fallback.remove(0))
        }
    }

    /// Whether the element still shows what it showed at registration.
    pub fn is_current(&self) -> bool {
        if !self.element.is_connected() {
            return false;
        }
        if self.element.text_content().trim() != self.original_text {
            return false;
        }
        // A recycled row may coincidentally show the same text while
        // having been re-registered under a different key.
        let key = self.key.to_string();
        self.element
            .attribute(KEY_MARKER_ATTR)
            .is_none_or(|marker| marker == key)
    }
}

/// Apply a resolution outcome to `binding` and return its new state.
///
/// Writes only when the element is still connected and unchanged; a
/// missing name leaves the DOM as it is.
pub fn apply<E: Element>(binding: &mut Binding<E>, name: Option<&str>) -> BindingState {
    binding.state = if !binding.is_current() {
        tracing::trace!(key = %binding.key, "Dropping stale resolution");
        BindingState::Abandoned
    } else {
        match name {
            None => BindingState::Fallback,
            Some(name) => {
                binding.element.set_text_content(name);
                binding.element.set_attribute("title", &binding.original_text);
                // Cleared so a row later recycled back to this handle is
                // registered again.
                binding.element.set_attribute(KEY_MARKER_ATTR, "");
                BindingState::Resolved
            }
        }
    };
    binding.state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{MemoryDocument, MemoryElement};

    fn attached(doc: &MemoryDocument, text: &str) -> MemoryElement {
        let el = MemoryElement::new("span").with_text(text);
        doc.root().append_child(&el);
        el
    }

    fn key(h: &str) -> ResolveKey {
        ResolveKey::Handle(h.into())
    }

    #[test]
    fn writes_name_and_keeps_handle_as_title() {
        let doc = MemoryDocument::new();
        let el = attached(&doc, " @someone ");
        let mut binding = Binding::pending(el.clone(), key("@someone"));

        assert_eq!(apply(&mut binding, Some("Some One")), BindingState::Resolved);
        assert_eq!(el.text_content(), "Some One");
        assert_eq!(el.attribute("title").as_deref(), Some("@someone"));
        assert_eq!(el.attribute(KEY_MARKER_ATTR).as_deref(), Some(""));
    }

    #[test]
    fn detached_element_is_abandoned_without_write() {
        let doc = MemoryDocument::new();
        let el = attached(&doc, "@gone");
        let mut binding = Binding::pending(el.clone(), key("@gone"));
        el.remove();

        assert_eq!(apply(&mut binding, Some("Gone")), BindingState::Abandoned);
        assert_eq!(el.text_content(), "@gone");
        assert!(el.attribute("title").is_none());
    }

    #[test]
    fn recycled_text_is_abandoned() {
        let doc = MemoryDocument::new();
        let el = attached(&doc, "@first");
        let mut binding = Binding::pending(el.clone(), key("@first"));
        el.set_text_content("@second");

        assert_eq!(apply(&mut binding, Some("First")), BindingState::Abandoned);
        assert_eq!(el.text_content(), "@second");
    }

    #[test]
    fn re_registered_marker_is_abandoned() {
        let doc = MemoryDocument::new();
        let el = attached(&doc, "@same").with_attr(KEY_MARKER_ATTR, "h:@same");
        let mut binding = Binding::pending(el.clone(), key("@same"));
        el.set_attribute(KEY_MARKER_ATTR, "cid:UCabcdefghijklmnopqrstuv");

        assert_eq!(apply(&mut binding, Some("Same")), BindingState::Abandoned);
        assert_eq!(el.text_content(), "@same");
    }

    #[test]
    fn fallback_keys_are_taken_in_order() {
        let doc = MemoryDocument::new();
        let el = attached(&doc, "@both");
        let cid = ResolveKey::ChannelId("UCabcdefghijklmnopqrstuv".into());
        let mut binding =
            Binding::pending(el, cid).with_fallback(vec![key("@both"), key("@other")]);

        assert_eq!(binding.next_fallback(), Some(key("@both")));
        assert_eq!(binding.next_fallback(), Some(key("@other")));
        assert_eq!(binding.next_fallback(), None);
    }

    #[test]
    fn missing_name_falls_back() {
        let doc = MemoryDocument::new();
        let el = attached(&doc, "@nobody");
        let mut binding = Binding::pending(el.clone(), key("@nobody"));

        assert_eq!(apply(&mut binding, None), BindingState::Fallback);
        assert!(binding.state.is_terminal());
        assert_eq!(el.text_content(), "@nobody");
    }
}
