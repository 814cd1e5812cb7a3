//! Event Bus
//!
//! Named events travel along the scope tree:
//!
//! - [`Scope::emit`] bubbles from a scope up to the root. Any listener can
//!   stop it with [`Event::stop_propagation`].
//! - [`Scope::broadcast`] visits a scope and all its descendants in
//!   pre-order. It cannot be stopped.
//!
//! # Listener Storage
//!
//! Listeners for one name are kept in slots. Deregistering a listener
//! empties its slot instead of shifting the list, so a dispatch in progress
//! keeps its position. The next dispatch that walks over an empty slot
//! removes it.
//!
//! Every scope also counts the listeners in its subtree per name, so a
//! broadcast never enters a subtree that has nobody listening.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CallbackError, IntoOutcome};
use crate::scope::{Scope, WalkGuard};
use crate::tree::ScopeId;
use crate::value::Value;
use crate::watch::Deregistration;

type ListenerFn = Box<dyn Fn(&mut Event, &[Value]) -> Result<(), CallbackError>>;

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A registered listener.
pub(crate) struct ListenerEntry {
    id: ListenerId,
    callback: ListenerFn,
}

/// The object handed to every listener of one dispatch.
pub struct Event {
    name: String,
    target_scope: Scope,
    current_scope: Option<Scope>,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl Event {
    fn new(name: &str, target_scope: Scope) -> Self {
        Self {
            name: name.to_string(),
            target_scope,
            current_scope: None,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope the event was emitted or broadcast from.
    pub fn target_scope(&self) -> &Scope {
        &self.target_scope
    }

    /// The scope whose listeners are running. `None` once dispatch is over.
    pub fn current_scope(&self) -> Option<&Scope> {
        self.current_scope.as_ref()
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Stop an `emit` after the current scope's listeners. No effect on
    /// `broadcast`.
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("target_scope", &self.target_scope.id())
            .field("current_scope", &self.current_scope.as_ref().map(Scope::id))
            .field("default_prevented", &self.default_prevented)
            .finish()
    }
}

impl Scope {
    /// Listen for `name` on this scope.
    ///
    /// The listener receives the shared event and the dispatch arguments.
    pub fn on<F, R>(&self, name: &str, listener: F) -> Deregistration
    where
        F: Fn(&mut Event, &[Value]) -> R + 'static,
        R: IntoOutcome,
    {
        let entry = Rc::new(ListenerEntry {
            id: ListenerId::next(),
            callback: Box::new(move |event: &mut Event, args: &[Value]| {
                listener(event, args).into_outcome()
            }),
        });
        let id = entry.id;

        let rejected = {
            let mut arena = self.shared.arena.borrow_mut();
            match arena.live_mut(self.id) {
                Some(node) => {
                    node.listeners
                        .entry(name.to_string())
                        .or_default()
                        .push(Some(entry));
                    arena.add_listener_count(self.id, name, 1);
                    None
                }
                None => Some(entry),
            }
        };
        if rejected.is_some() {
            return Deregistration::inert();
        }

        let weak = self.downgrade();
        let name = name.to_string();
        Deregistration::new(move || {
            if let Some(scope) = weak.upgrade() {
                scope.remove_listener(&name, id);
            }
        })
    }

    fn remove_listener(&self, name: &str, id: ListenerId) {
        let removed = {
            let mut arena = self.shared.arena.borrow_mut();
            let Some(node) = arena.live_mut(self.id) else {
                return;
            };
            let Some(slot) = node.listeners.get_mut(name).and_then(|slots| {
                slots
                    .iter_mut()
                    .find(|slot| matches!(slot, Some(entry) if entry.id == id))
            }) else {
                return;
            };
            let removed = slot.take();
            arena.add_listener_count(self.id, name, -1);
            removed
        };
        drop(removed);
    }

    /// Dispatch `name` to this scope and then each ancestor up to the root.
    pub fn emit(&self, name: &str, args: &[Value]) -> Event {
        let mut event = Event::new(name, self.clone());
        if self.is_destroyed() {
            return event;
        }
        let _walk = WalkGuard::enter(&self.shared);

        let mut current = Some(self.id);
        while let Some(id) = current {
            event.current_scope = Some(self.sibling_handle(id));
            self.notify_listeners(id, &mut event, args);
            if event.propagation_stopped {
                break;
            }
            current = self.shared.arena.borrow().get(id).and_then(|node| node.parent);
        }

        event.current_scope = None;
        event
    }

    /// Dispatch `name` to this scope and every descendant, parents first.
    pub fn broadcast(&self, name: &str, args: &[Value]) -> Event {
        let mut event = Event::new(name, self.clone());
        let listening = self
            .shared
            .arena
            .borrow()
            .live(self.id)
            .is_some_and(|node| node.listener_count(name) > 0);
        if !listening {
            return event;
        }
        let _walk = WalkGuard::enter(&self.shared);

        let mut current = Some(self.id);
        while let Some(id) = current {
            event.current_scope = Some(self.sibling_handle(id));
            self.notify_listeners(id, &mut event, args);

            current = {
                let arena = self.shared.arena.borrow();
                let descend = arena
                    .get(id)
                    .is_some_and(|node| node.listener_count(name) > 0);
                arena.next_in_walk(id, self.id, descend)
            };
        }

        event.current_scope = None;
        event
    }

    /// Dispatch `name` to exactly the scopes in `targets`, in order.
    pub(crate) fn dispatch_to(&self, name: &str, targets: &[ScopeId]) -> Event {
        let mut event = Event::new(name, self.clone());
        let _walk = WalkGuard::enter(&self.shared);

        for &id in targets {
            event.current_scope = Some(self.sibling_handle(id));
            self.notify_listeners(id, &mut event, &[]);
        }

        event.current_scope = None;
        event
    }

    /// Run the `event.name` listeners of one scope.
    ///
    /// Listeners added while this runs wait for the next dispatch.
    fn notify_listeners(&self, id: ScopeId, event: &mut Event, args: &[Value]) {
        let name = event.name.clone();
        let mut len = self.listener_slots(id, &name);
        let mut index = 0;

        while index < len {
            let slot = {
                let arena = self.shared.arena.borrow();
                arena
                    .get(id)
                    .and_then(|node| node.listeners.get(&name))
                    .and_then(|slots| slots.get(index).cloned())
            };
            match slot {
                Some(Some(entry)) => {
                    if let Err(err) = (entry.callback)(&mut *event, args) {
                        self.shared.report(&*err, "listener");
                    }
                    index += 1;
                }
                Some(None) => {
                    let mut arena = self.shared.arena.borrow_mut();
                    if let Some(slots) = arena
                        .get_mut(id)
                        .and_then(|node| node.listeners.get_mut(&name))
                    {
                        slots.remove(index);
                    }
                    len -= 1;
                }
                None => break,
            }
        }
    }

    fn listener_slots(&self, id: ScopeId, name: &str) -> usize {
        self.shared
            .arena
            .borrow()
            .get(id)
            .and_then(|node| node.listeners.get(name))
            .map_or(0, Vec::len)
    }
}
