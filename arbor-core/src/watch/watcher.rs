//! Watcher Registry
//!
//! Each scope keeps its watchers in a `Vec` in registration order, which is
//! also firing order. The digest walks that `Vec` with a cursor stored on
//! the tree, so registry changes made by reactions keep the walk consistent:
//!
//! - New watchers are appended. A digest standing on the same scope reaches
//!   them later in the same lap.
//! - Removing a watcher before the cursor pulls the cursor back by one, so
//!   the watcher that logically follows is not skipped.
//!
//! Both changes also clear the digest's "last dirty watcher" memory, which
//! forces one more full lap.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CallbackError, IntoOutcome};
use crate::scope::Scope;
use crate::value::Value;

use super::probe::Probe;

pub(crate) type Reaction = Rc<dyn Fn(&Value, &Value, &Scope) -> Result<(), CallbackError>>;

/// Unique identifier for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A (probe, reaction) pair plus the last value the probe produced.
pub(crate) struct Watcher {
    pub(crate) id: WatcherId,
    pub(crate) probe: Probe,
    pub(crate) reaction: Reaction,

    /// Compare structurally and keep a deep copy as the last value.
    pub(crate) deep: bool,

    /// `None` until the first check, so the first check always fires.
    pub(crate) last: RefCell<Option<Value>>,

    /// Leave the registry after the first check. Set for constant probes.
    pub(crate) once: bool,
}

impl Watcher {
    pub(crate) fn new<F, R>(probe: Probe, reaction: F, deep: bool) -> Self
    where
        F: Fn(&Value, &Value, &Scope) -> R + 'static,
        R: IntoOutcome,
    {
        let once = probe.is_constant();
        Self {
            id: WatcherId::next(),
            probe,
            reaction: Rc::new(move |new: &Value, old: &Value, scope: &Scope| {
                reaction(new, old, scope).into_outcome()
            }),
            deep,
            last: RefCell::new(None),
            once,
        }
    }

    /// Remove the watcher after its first check whatever its probe is.
    pub(crate) fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("probe", &self.probe)
            .field("deep", &self.deep)
            .field("once", &self.once)
            .finish()
    }
}

/// Handle returned by every registration.
///
/// Calling [`deregister`](Self::deregister) more than once is harmless.
/// Registrations made on a destroyed scope return an inert handle.
#[derive(Clone)]
pub struct Deregistration {
    action: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl Deregistration {
    pub(crate) fn new(action: impl FnOnce() + 'static) -> Self {
        Self {
            action: Rc::new(RefCell::new(Some(Box::new(action)))),
        }
    }

    pub(crate) fn inert() -> Self {
        Self {
            action: Rc::new(RefCell::new(None)),
        }
    }

    pub fn deregister(&self) {
        let action = self.action.borrow_mut().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Whether deregistering would do nothing.
    pub fn is_inert(&self) -> bool {
        self.action.borrow().is_none()
    }
}

impl fmt::Debug for Deregistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deregistration")
            .field("inert", &self.is_inert())
            .finish()
    }
}

impl Scope {
    /// Watch a probe by identity.
    ///
    /// The reaction receives `(new, old, scope)`. On the first call `old`
    /// is the very same reference as `new`.
    pub fn watch<P, F, R>(&self, probe: P, reaction: F) -> Deregistration
    where
        P: Into<Probe>,
        F: Fn(&Value, &Value, &Scope) -> R + 'static,
        R: IntoOutcome,
    {
        self.register_watcher(Watcher::new(probe.into(), reaction, false))
    }

    /// Watch a probe by structure. Nested changes inside arrays and objects
    /// fire the reaction.
    pub fn watch_deep<P, F, R>(&self, probe: P, reaction: F) -> Deregistration
    where
        P: Into<Probe>,
        F: Fn(&Value, &Value, &Scope) -> R + 'static,
        R: IntoOutcome,
    {
        self.register_watcher(Watcher::new(probe.into(), reaction, true))
    }

    pub(crate) fn register_watcher(&self, watcher: Watcher) -> Deregistration {
        let id = watcher.id;
        let rejected = {
            let mut arena = self.shared.arena.borrow_mut();
            match arena.live_mut(self.id) {
                Some(node) => {
                    node.watchers.push(Rc::new(watcher));
                    arena.add_watcher_count(self.id, 1);
                    None
                }
                None => Some(watcher),
            }
        };
        if rejected.is_some() {
            return Deregistration::inert();
        }
        self.shared.digest.last_dirty.set(None);

        let weak = self.downgrade();
        Deregistration::new(move || {
            if let Some(scope) = weak.upgrade() {
                scope.remove_watcher(id);
            }
        })
    }

    /// Remove a watcher from this scope. Unknown ids are ignored.
    pub(crate) fn remove_watcher(&self, id: WatcherId) {
        let removed = {
            let mut arena = self.shared.arena.borrow_mut();
            let Some(node) = arena.live_mut(self.id) else {
                return;
            };
            let Some(index) = node.watchers.iter().position(|w| w.id == id) else {
                return;
            };
            let removed = node.watchers.remove(index);
            arena.add_watcher_count(self.id, -1);
            (index, removed)
        };

        let (index, watcher) = removed;
        self.shared.digest.step_back_if_before(self.id, index);
        self.shared.digest.last_dirty.set(None);
        drop(watcher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_updates_counts() {
        let root = Scope::new_root();
        let child = root.new_child();

        let first = child.watch("a", |_: &Value, _: &Value, _: &Scope| {});
        let _second = child.watch("b", |_: &Value, _: &Value, _: &Scope| {});
        assert_eq!(child.count_watchers(), 2);
        assert_eq!(root.count_watchers(), 2);

        first.deregister();
        first.deregister();
        assert_eq!(root.count_watchers(), 1);
        assert!(first.is_inert());
    }

    #[test]
    fn destroyed_scope_returns_inert_handle() {
        let root = Scope::new_root();
        let child = root.new_child();
        child.destroy();

        let handle = child.watch("a", |_: &Value, _: &Value, _: &Scope| {});
        assert!(handle.is_inert());
        handle.deregister();
        assert_eq!(root.count_watchers(), 0);
    }

    #[test]
    fn deregistration_after_tree_is_gone_is_harmless() {
        let root = Scope::new_root();
        let handle = root.watch("a", |_: &Value, _: &Value, _: &Scope| {});
        drop(root);
        handle.deregister();
    }
}
