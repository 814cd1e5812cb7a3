//! Scope Nodes
//!
//! This module defines the record stored in the arena for every scope.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::event::ListenerEntry;
use crate::value::Value;
use crate::watch::Watcher;

/// Unique identifier for a scope.
///
/// Ids increase monotonically in creation order and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a scope is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    /// Fully attached and participating in digests and events.
    Active,

    /// `$destroy` is being broadcast. The scope is still attached so its
    /// listeners can observe it, but a second destroy is ignored.
    Destroying,

    /// Detached. Only kept in the arena as a tombstone until the traversal
    /// that may still be standing on it finishes.
    Destroyed,
}

/// Listener slots for one event name. `None` marks a hole left by a
/// deregistration; holes are compacted by the next dispatch.
pub(crate) type ListenerSlots = Vec<Option<Rc<ListenerEntry>>>;

/// A scope in the tree.
pub(crate) struct ScopeNode {
    pub(crate) id: ScopeId,
    pub(crate) lifecycle: Lifecycle,

    /// Isolated scopes do not read through to any other scope's state.
    pub(crate) isolated: bool,
    pub(crate) suspended: bool,

    /// The scope whose state this one reads through to.
    ///
    /// Usually the structural parent, but a child attached elsewhere still
    /// inherits from the scope it was created from.
    pub(crate) state_parent: Option<ScopeId>,
    pub(crate) state: IndexMap<String, Value>,

    pub(crate) parent: Option<ScopeId>,
    pub(crate) child_head: Option<ScopeId>,
    pub(crate) child_tail: Option<ScopeId>,
    pub(crate) prev_sibling: Option<ScopeId>,
    pub(crate) next_sibling: Option<ScopeId>,

    /// Watchers in firing order.
    pub(crate) watchers: Vec<Rc<Watcher>>,

    /// Own watchers plus every descendant's.
    pub(crate) watcher_count: usize,

    pub(crate) listeners: HashMap<String, ListenerSlots>,

    /// Per event name: own listeners plus every descendant's.
    pub(crate) listener_counts: HashMap<String, usize>,
}

impl ScopeNode {
    /// Create a detached, active node.
    pub(crate) fn new(isolated: bool, state_parent: Option<ScopeId>) -> Self {
        Self {
            id: ScopeId::next(),
            lifecycle: Lifecycle::Active,
            isolated,
            suspended: false,
            state_parent,
            state: IndexMap::new(),
            parent: None,
            child_head: None,
            child_tail: None,
            prev_sibling: None,
            next_sibling: None,
            watchers: Vec::new(),
            watcher_count: 0,
            listeners: HashMap::new(),
            listener_counts: HashMap::new(),
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.lifecycle == Lifecycle::Destroyed
    }

    /// Not yet on its way out. Only active nodes take new children.
    pub(crate) fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    /// Accepts new watchers, listeners and tasks.
    pub(crate) fn is_live(&self) -> bool {
        self.lifecycle != Lifecycle::Destroyed
    }

    pub(crate) fn listener_count(&self, name: &str) -> usize {
        self.listener_counts.get(name).copied().unwrap_or(0)
    }

    /// Detach everything the node owns and keep only the links a walk
    /// needs to step past it.
    ///
    /// The owned parts are handed back so the caller can drop them outside
    /// any arena borrow; they may hold user closures.
    pub(crate) fn clear_for_tombstone(&mut self) -> Released {
        self.lifecycle = Lifecycle::Destroyed;
        self.watcher_count = 0;
        self.listener_counts.clear();
        self.child_head = None;
        self.child_tail = None;
        self.prev_sibling = None;
        Released {
            _state: std::mem::take(&mut self.state),
            _watchers: std::mem::take(&mut self.watchers),
            _listeners: std::mem::take(&mut self.listeners),
        }
    }
}

/// What a node owned before it was destroyed.
pub(crate) struct Released {
    _state: IndexMap<String, Value>,
    _watchers: Vec<Rc<Watcher>>,
    _listeners: HashMap<String, ListenerSlots>,
}

impl fmt::Debug for ScopeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeNode")
            .field("id", &self.id)
            .field("lifecycle", &self.lifecycle)
            .field("isolated", &self.isolated)
            .field("suspended", &self.suspended)
            .field("parent", &self.parent)
            .field("watcher_count", &self.watcher_count)
            .field("listener_counts", &self.listener_counts)
            .finish()
    }
}
