//! Scope Handles
//!
//! A [`Scope`] is a cheap, cloneable handle: the tree it belongs to plus the
//! id of one node in it. Handles never own the node. When the node is
//! destroyed every handle to it becomes inert, and every operation on an
//! inert handle is a silent no-op.

use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::phase::Phase;
use super::shared::Shared;
use crate::config::RootConfig;
use crate::error::{CallbackError, ErrorSink, Result, TracingErrorSink};
use crate::queue::{ManualScheduler, Scheduler};
use crate::tree::{ScopeId, ScopeNode};
use crate::value::Value;
use crate::watch::Probe;

/// Extra names visible to a path probe, shadowing scope state.
pub type Locals = IndexMap<String, Value>;

/// Handle to one scope of a tree.
#[derive(Clone)]
pub struct Scope {
    pub(crate) shared: Rc<Shared>,
    pub(crate) id: ScopeId,
}

/// Non-owning handle to a scope.
///
/// Closures stored on a scope should capture this instead of a [`Scope`]
/// so they do not keep the tree alive.
#[derive(Clone)]
pub struct WeakScope {
    shared: Weak<Shared>,
    id: ScopeId,
}

impl WeakScope {
    /// Get a strong handle back, if the tree still exists.
    pub fn upgrade(&self) -> Option<Scope> {
        self.shared.upgrade().map(|shared| Scope { shared, id: self.id })
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }
}

impl fmt::Debug for WeakScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakScope").field("id", &self.id).finish()
    }
}

// ----------------------------------------------------------------------------
// Root construction
// ----------------------------------------------------------------------------

/// Builder for a new scope tree.
///
/// ```
/// use arbor_core::RootBuilder;
///
/// let root = RootBuilder::new().ttl(5).build().unwrap();
/// assert!(root.is_root());
/// ```
#[derive(Default)]
pub struct RootBuilder {
    config: RootConfig,
    sink: Option<Rc<dyn ErrorSink>>,
    scheduler: Option<Rc<dyn Scheduler>>,
}

impl RootBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RootConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of extra laps a digest may run.
    pub fn ttl(mut self, ttl: usize) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Where caught callback errors go. Defaults to [`TracingErrorSink`].
    pub fn error_sink(mut self, sink: Rc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// What runs deferred flushes. Defaults to a private
    /// [`ManualScheduler`] that only runs when the tree digests.
    pub fn scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Validate the configuration and create the root scope.
    pub fn build(self) -> Result<Scope> {
        self.config.validate()?;
        let sink = self.sink.unwrap_or_else(|| Rc::new(TracingErrorSink));
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Rc::new(ManualScheduler::new()));
        Ok(Scope::from_shared(Shared::new(self.config, sink, scheduler)))
    }
}

// ----------------------------------------------------------------------------
// Scope
// ----------------------------------------------------------------------------

impl Scope {
    /// Create a tree with default settings and return its root.
    pub fn new_root() -> Scope {
        Scope::from_shared(Shared::new(
            RootConfig::default(),
            Rc::new(TracingErrorSink),
            Rc::new(ManualScheduler::new()),
        ))
    }

    pub fn builder() -> RootBuilder {
        RootBuilder::new()
    }

    fn from_shared(shared: Shared) -> Scope {
        let id = shared.root;
        tracing::debug!(root = %id, ttl = shared.config.ttl, "scope tree created");
        Scope {
            shared: Rc::new(shared),
            id,
        }
    }

    /// Another handle on the same tree.
    pub(crate) fn sibling_handle(&self, id: ScopeId) -> Scope {
        Scope {
            shared: Rc::clone(&self.shared),
            id,
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn root(&self) -> Scope {
        self.sibling_handle(self.shared.root)
    }

    pub fn is_root(&self) -> bool {
        self.id == self.shared.root
    }

    /// The structural parent. `None` for the root and for destroyed scopes.
    pub fn parent(&self) -> Option<Scope> {
        let parent = self.shared.arena.borrow().live(self.id)?.parent?;
        Some(self.sibling_handle(parent))
    }

    /// The phase the tree is in right now.
    pub fn phase(&self) -> Option<Phase> {
        self.shared.phase.get()
    }

    pub fn is_isolated(&self) -> bool {
        self.shared
            .arena
            .borrow()
            .get(self.id)
            .is_some_and(|node| node.isolated)
    }

    pub fn downgrade(&self) -> WeakScope {
        WeakScope {
            shared: Rc::downgrade(&self.shared),
            id: self.id,
        }
    }

    // ---- Children ----

    /// Create a child that reads through to this scope's state.
    pub fn new_child(&self) -> Scope {
        self.new_child_with(false, None)
    }

    /// Create a child that sees only its own state.
    pub fn new_isolated_child(&self) -> Scope {
        self.new_child_with(true, None)
    }

    /// Create a child, optionally attached under a different parent.
    ///
    /// A non-isolated child always inherits state from `self`, even when it
    /// is attached under `attach_to`. The new scope takes part in digests
    /// and events through its structural parent. `attach_to` on another
    /// tree is ignored.
    ///
    /// On a destroyed or destroying scope (or such an `attach_to`) the
    /// returned handle is inert.
    pub fn new_child_with(&self, isolated: bool, attach_to: Option<&Scope>) -> Scope {
        let parent = match attach_to {
            Some(other) if Rc::ptr_eq(&other.shared, &self.shared) => other.id,
            _ => self.id,
        };
        let node = ScopeNode::new(isolated, (!isolated).then_some(self.id));
        let id = node.id;

        let attached = {
            let mut arena = self.shared.arena.borrow_mut();
            let active = |id: ScopeId| arena.get(id).is_some_and(ScopeNode::is_active);
            if active(self.id) && active(parent) {
                arena.attach_child(parent, node).is_some()
            } else {
                false
            }
        };
        if attached {
            tracing::debug!(scope = %id, parent = %parent, isolated, "scope created");
        }
        self.sibling_handle(id)
    }

    /// Number of scopes below this one.
    pub fn count_child_scopes(&self) -> usize {
        let arena = self.shared.arena.borrow();
        if arena.live(self.id).is_none() {
            return 0;
        }
        arena.count_descendants(self.id)
    }

    /// Number of watchers on this scope and every scope below it.
    pub fn count_watchers(&self) -> usize {
        self.shared
            .arena
            .borrow()
            .live(self.id)
            .map_or(0, |node| node.watcher_count)
    }

    // ---- State ----

    /// Read `key`, falling back through inherited scopes.
    pub fn get(&self, key: &str) -> Value {
        let arena = self.shared.arena.borrow();
        let mut current = Some(self.id);
        while let Some(id) = current {
            let Some(node) = arena.live(id) else {
                break;
            };
            if let Some(value) = node.state.get(key) {
                return value.clone();
            }
            current = node.state_parent;
        }
        Value::Undefined
    }

    /// Write `key` on this scope, shadowing any inherited value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let previous = {
            let mut arena = self.shared.arena.borrow_mut();
            match arena.live_mut(self.id) {
                Some(node) => node.state.insert(key.into(), value.into()),
                None => None,
            }
        };
        drop(previous);
    }

    /// Replace `key` with `f(current)`. `current` may be inherited.
    pub fn update<F, V>(&self, key: &str, f: F)
    where
        F: FnOnce(Value) -> V,
        V: Into<Value>,
    {
        let next = f(self.get(key));
        self.set(key, next);
    }

    /// Remove `key` from this scope's own state, uncovering any inherited
    /// value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut arena = self.shared.arena.borrow_mut();
        arena.live_mut(self.id)?.state.shift_remove(key)
    }

    /// Whether `key` is set on this scope itself.
    pub fn has_own(&self, key: &str) -> bool {
        self.shared
            .arena
            .borrow()
            .live(self.id)
            .is_some_and(|node| node.state.contains_key(key))
    }

    // ---- Evaluation ----

    /// Evaluate a probe once against this scope.
    pub fn eval(&self, probe: impl Into<Probe>) -> std::result::Result<Value, CallbackError> {
        probe.into().evaluate(self, None)
    }

    /// Evaluate a probe with `locals` shadowing scope state.
    pub fn eval_with(
        &self,
        probe: impl Into<Probe>,
        locals: &Locals,
    ) -> std::result::Result<Value, CallbackError> {
        probe.into().evaluate(self, Some(locals))
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Scope) -> bool {
        self.id == other.id && Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
