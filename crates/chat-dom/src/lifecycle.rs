//! Tracks the scoped chat container across replacement and navigation.

use crate::dom::Element;

/// What changed since the previous [`ContainerWatch::check`].
#[derive(Debug, Clone)]
pub enum LifecycleEvent<E> {
    Unchanged,
    /// A container appeared where there was none.
    Attached(E),
    /// The container was swapped for a different element.
    Replaced(E),
    /// The container went away and nothing took its place yet.
    Detached,
}

#[derive(Debug, Clone)]
enum WatchState<E> {
    Unattached,
    Attached(E),
    /// Previous container is gone; waiting for its successor.
    Stale,
}

/// `Unattached -> Attached -> Stale -> Attached(new)` state machine.
#[derive(Debug, Clone)]
pub struct ContainerWatch<E> {
    state: WatchState<E>,
}

impl<E: Element> Default for ContainerWatch<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element> ContainerWatch<E> {
    pub fn new() -> Self {
        Self {
            state: WatchState::Unattached,
        }
    }

    pub fn current(&self) -> Option<&E> {
        match &self.state {
            WatchState::Attached(el) => Some(el),
            _ => None,
        }
    }

    /// Feed the result of locating the container right now.
    ///
    /// A located element that is not connected counts as absent.
    pub fn check(&mut self, found: Option<E>) -> LifecycleEvent<E> {
        let found = found.filter(Element::is_connected);
        let (next, event) = match (&self.state, found) {
            (WatchState::Attached(cur), Some(el)) if cur.node_id() == el.node_id() => {
                return LifecycleEvent::Unchanged;
            }
            (WatchState::Attached(_), Some(el)) | (WatchState::Stale, Some(el)) => {
                (WatchState::Attached(el.clone()), LifecycleEvent::Replaced(el))
            }
            (WatchState::Unattached, Some(el)) => {
                (WatchState::Attached(el.clone()), LifecycleEvent::Attached(el))
            }
            (WatchState::Attached(_), None) => (WatchState::Stale, LifecycleEvent::Detached),
            (WatchState::Unattached, None) | (WatchState::Stale, None) => {
                return LifecycleEvent::Unchanged;
            }
        };
        tracing::debug!(event = event_name(&event), "Chat container changed");
        self.state = next;
        event
    }
}

fn event_name<E>(event: &LifecycleEvent<E>) -> &'static str {
    match event {
        LifecycleEvent::Unchanged => "unchanged",
        LifecycleEvent::Attached(_) => "attached",
        LifecycleEvent::Replaced(_) => "replaced",
        LifecycleEvent::Detached => "detached",
    }
}
