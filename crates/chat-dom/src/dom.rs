//! Element abstraction and an in-memory tree implementing it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub type NodeId = u64;

/// The slice of a DOM element the restorer needs.
///
/// Implementations are handles: cloning yields another reference to the
/// same node, and mutation through one clone is visible through all.
pub trait Element: Clone + Send + Sync + 'static {
    /// Stable identity for the lifetime of the node.
    fn node_id(&self) -> NodeId;
    /// Lowercase tag name.
    fn tag_name(&self) -> String;
    fn text_content(&self) -> String;
    fn set_text_content(&self, text: &str);
    fn attribute(&self, name: &str) -> Option<String>;
    fn set_attribute(&self, name: &str, value: &str);
    fn parent(&self) -> Option<Self>;
    fn children(&self) -> Vec<Self>;
    /// Whether the node is still reachable from the document root.
    fn is_connected(&self) -> bool;
}

/// Nearest inclusive ancestor matching `pred`.
pub fn closest<E: Element>(el: &E, pred: impl Fn(&E) -> bool) -> Option<E> {
    let mut cur = Some(el.clone());
    while let Some(node) = cur {
        if pred(&node) {
            return Some(node);
        }
        cur = node.parent();
    }
    None
}

/// All descendants in document order, excluding `el` itself.
pub fn descendants<E: Element>(el: &E) -> Vec<E> {
    let mut out = Vec::new();
    let mut stack: Vec<E> = el.children().into_iter().rev().collect();
    while let Some(node) = stack.pop() {
        stack.extend(node.children().into_iter().rev());
        out.push(node);
    }
    out
}

/// First descendant in document order matching `pred`.
pub fn first_descendant<E: Element>(el: &E, pred: impl Fn(&E) -> bool) -> Option<E> {
    let mut stack: Vec<E> = el.children().into_iter().rev().collect();
    while let Some(node) = stack.pop() {
        if pred(&node) {
            return Some(node);
        }
        stack.extend(node.children().into_iter().rev());
    }
    None
}

/// Whether `el` is `ancestor` or lies inside it.
pub fn is_inclusive_descendant<E: Element>(el: &E, ancestor: &E) -> bool {
    let id = ancestor.node_id();
    closest(el, |n| n.node_id() == id).is_some()
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

struct Node {
    id: NodeId,
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    children: Vec<MemoryElement>,
    parent: Weak<Mutex<Node>>,
    is_document: bool,
}

/// Node of an in-memory element tree.
#[derive(Clone)]
pub struct MemoryElement(Arc<Mutex<Node>>);

impl std::fmt::Debug for MemoryElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let node = self.lock();
        f.debug_struct("MemoryElement")
            .field("id", &node.id)
            .field("tag", &node.tag)
            .field("attrs", &node.attrs)
            .finish()
    }
}

impl MemoryElement {
    pub fn new(tag: &str) -> Self {
        Self(Arc::new(Mutex::new(Node {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            text: String::new(),
            children: Vec::new(),
            parent: Weak::new(),
            is_document: false,
        })))
    }

    pub fn with_attr(self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.lock().text = text.to_string();
        self
    }

    pub fn with_child(self, child: MemoryElement) -> Self {
        self.append_child(&child);
        self
    }

    /// Append `child`, moving it out of any previous parent.
    pub fn append_child(&self, child: &MemoryElement) {
        child.remove();
        child.lock().parent = Arc::downgrade(&self.0);
        self.lock().children.push(child.clone());
    }

    /// Detach from the parent, if any.
    pub fn remove(&self) {
        let parent = {
            let mut node = self.lock();
            let parent = node.parent.upgrade();
            node.parent = Weak::new();
            parent
        };
        if let Some(parent) = parent {
            let id = self.node_id();
            lock_node(&parent).children.retain(|c| c.node_id() != id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Node> {
        lock_node(&self.0)
    }
}

fn lock_node(node: &Mutex<Node>) -> MutexGuard<'_, Node> {
    node.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Element for MemoryElement {
    fn node_id(&self) -> NodeId {
        self.lock().id
    }

    fn tag_name(&self) -> String {
        self.lock().tag.clone()
    }

    fn text_content(&self) -> String {
        let (mut text, children) = {
            let node = self.lock();
            (node.text.clone(), node.children.clone())
        };
        for child in children {
            text.push_str(&child.text_content());
        }
        text
    }

    fn set_text_content(&self, text: &str) {
        let children = {
            let mut node = self.lock();
            node.text = text.to_string();
            std::mem::take(&mut node.children)
        };
        for child in children {
            child.lock().parent = Weak::new();
        }
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.lock().attrs.get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.lock()
            .attrs
            .insert(name.to_string(), value.to_string());
    }

    fn parent(&self) -> Option<Self> {
        self.lock().parent.upgrade().map(MemoryElement)
    }

    fn children(&self) -> Vec<Self> {
        self.lock().children.clone()
    }

    fn is_connected(&self) -> bool {
        closest(self, |n| n.lock().is_document).is_some()
    }
}

/// Root of an in-memory tree; nodes under it are connected.
#[derive(Clone, Debug)]
pub struct MemoryDocument {
    root: MemoryElement,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    pub fn new() -> Self {
        let root = MemoryElement::new("html");
        root.lock().is_document = true;
        Self { root }
    }

    pub fn root(&self) -> &MemoryElement {
        &self.root
    }

    /// First element (root included) whose `id` attribute equals `id`.
    pub fn get_element_by_id(&self, id: &str) -> Option<MemoryElement> {
        let matches = |n: &MemoryElement| n.attribute("id").as_deref() == Some(id);
        if matches(&self.root) {
            return Some(self.root.clone());
        }
        first_descendant(&self.root, matches)
    }
}
