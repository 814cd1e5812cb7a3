//! State shared by every scope of one tree.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::config::RootConfig;
use crate::digest::DigestState;
use crate::error::ErrorSink;
use crate::queue::{Queues, Scheduler};
use crate::tree::{ScopeArena, ScopeId, ScopeNode};

use super::phase::Phase;

/// The tree behind every [`Scope`](super::Scope) handle.
///
/// Everything here is owned by the root: there is exactly one phase flag,
/// one async queue, one apply-async queue and one post-digest queue per
/// tree.
pub(crate) struct Shared {
    pub(crate) arena: RefCell<ScopeArena>,
    pub(crate) root: ScopeId,
    pub(crate) config: RootConfig,
    pub(crate) phase: Cell<Option<Phase>>,

    /// Number of traversals currently in progress.
    pub(crate) walks: Cell<usize>,

    /// Destroyed nodes waiting for the last traversal to finish.
    pub(crate) tombstones: RefCell<Vec<ScopeId>>,

    pub(crate) digest: DigestState,
    pub(crate) queues: Queues,
    pub(crate) sink: Rc<dyn ErrorSink>,
    pub(crate) scheduler: Rc<dyn Scheduler>,
}

impl Shared {
    pub(crate) fn new(
        config: RootConfig,
        sink: Rc<dyn ErrorSink>,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        let mut arena = ScopeArena::new();
        let root = arena.insert_root(ScopeNode::new(false, None));
        Self {
            arena: RefCell::new(arena),
            root,
            config,
            phase: Cell::new(None),
            walks: Cell::new(0),
            tombstones: RefCell::new(Vec::new()),
            digest: DigestState::default(),
            queues: Queues::default(),
            sink,
            scheduler,
        }
    }

    /// Hand an error to the tree's sink.
    pub(crate) fn report(&self, error: &(dyn std::error::Error + 'static), cause: &str) {
        self.sink.report(error, Some(cause));
    }

    /// Remove tombstoned nodes from the arena once nothing walks the tree.
    pub(crate) fn sweep_tombstones(&self) {
        if self.walks.get() > 0 {
            return;
        }
        let ids = std::mem::take(&mut *self.tombstones.borrow_mut());
        if ids.is_empty() {
            return;
        }
        // Dropped after the arena borrow ends; the nodes own user closures.
        let removed: Vec<ScopeNode> = {
            let mut arena = self.arena.borrow_mut();
            ids.into_iter().filter_map(|id| arena.remove(id)).collect()
        };
        tracing::trace!(count = removed.len(), "swept destroyed scopes");
        drop(removed);
    }
}
