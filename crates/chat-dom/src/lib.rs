//! DOM-side handle restoration.
//!
//! Watches a live element tree for `@handle` author labels, resolves them
//! through a [`name_resolver::ResolverService`], and writes display names
//! back while guarding against detached and recycled nodes.

pub mod dom;
pub mod extract;
pub mod lifecycle;
pub mod restorer;
pub mod scanner;
pub mod writer;

pub use dom::{Element, MemoryDocument, MemoryElement, NodeId};
pub use extract::{ExtractionStrategy, HandleExtractor, is_handle_text};
pub use lifecycle::{ContainerWatch, LifecycleEvent};
pub use restorer::{DomEvent, NameRestorer, RestorerOptions, RestorerStats};
pub use scanner::{CandidateMatcher, Scanner, default_matcher};
pub use writer::{Binding, BindingState};

/// Attribute recording which key an element was registered under.
pub const KEY_MARKER_ATTR: &str = "data-handle-key";
