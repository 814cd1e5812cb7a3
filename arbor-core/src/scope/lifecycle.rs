//! Scope Lifecycle
//!
//! Suspension and destruction.
//!
//! # How Destruction Works
//!
//! 1. The active part of the subtree is marked `Destroying`. A second
//!    `destroy` on any marked scope returns at once, and a destroy of an
//!    ancestor skips the marked scopes when it delivers `$destroy`.
//! 2. `$destroy` is dispatched to the marked scopes in walk order, while
//!    every listener can still see its own scope. Scopes on their way out
//!    take no new children.
//! 3. Everything still attached below the scope is torn down children
//!    first. Each node hands its aggregate watcher and listener counts
//!    back up the ancestor chain, is unlinked from its siblings and becomes
//!    a tombstone.
//! 4. Tombstones leave the arena as soon as no traversal is in progress.

use super::handle::Scope;
use crate::tree::{Lifecycle, Released, ScopeId};

/// Name of the event broadcast when a scope is destroyed.
pub const DESTROY_EVENT: &str = "$destroy";

impl Scope {
    /// Stop evaluating watchers of this scope and everything below it.
    pub fn suspend(&self) {
        if let Some(node) = self.shared.arena.borrow_mut().live_mut(self.id) {
            node.suspended = true;
        }
    }

    /// Undo [`suspend`](Self::suspend).
    ///
    /// When called from a reaction of an ancestor, the subtree is checked
    /// later in the same lap.
    pub fn resume(&self) {
        if let Some(node) = self.shared.arena.borrow_mut().live_mut(self.id) {
            node.suspended = false;
        }
    }

    /// Whether this scope itself is suspended. A suspended ancestor does not
    /// count.
    pub fn is_suspended(&self) -> bool {
        self.shared
            .arena
            .borrow()
            .live(self.id)
            .is_some_and(|node| node.suspended)
    }

    /// Whether this handle is inert.
    pub fn is_destroyed(&self) -> bool {
        self.shared
            .arena
            .borrow()
            .get(self.id)
            .map_or(true, |node| node.is_destroyed())
    }

    /// Destroy this scope and everything below it.
    ///
    /// Safe to call any number of times and from any callback.
    pub fn destroy(&self) {
        let Some(marked) = self.mark_destroying() else {
            return;
        };

        self.dispatch_to(DESTROY_EVENT, &marked);

        let subtree = self.live_subtree();
        let released = self.teardown(&subtree);
        let scopes = released.len();
        drop(released);

        if self.is_root() {
            let (cancelled, pending) = self.shared.queues.clear();
            if let Some(flush) = cancelled {
                self.shared.scheduler.cancel(flush);
            }
            drop(pending);
        }
        tracing::debug!(scope = %self.id, scopes, "scope destroyed");

        self.shared.sweep_tombstones();
    }

    /// Mark the active part of the subtree as going away and return it in
    /// walk order, or `None` if this scope is already on its way out.
    ///
    /// Subtrees already being destroyed by another call are skipped. That
    /// call delivers their `$destroy`.
    fn mark_destroying(&self) -> Option<Vec<ScopeId>> {
        let mut arena = self.shared.arena.borrow_mut();
        if !arena.get(self.id)?.is_active() {
            return None;
        }

        let mut marked = Vec::new();
        let mut current = Some(self.id);
        while let Some(id) = current {
            let active = arena.get(id).is_some_and(|node| node.is_active());
            if active {
                marked.push(id);
            }
            current = arena.next_in_walk(id, self.id, active);
        }
        for id in &marked {
            if let Some(node) = arena.get_mut(*id) {
                node.lifecycle = Lifecycle::Destroying;
            }
        }
        Some(marked)
    }

    /// Every node still attached below this scope, in walk order.
    ///
    /// Collected after `$destroy` so anything its listeners attached is
    /// torn down too.
    fn live_subtree(&self) -> Vec<ScopeId> {
        let arena = self.shared.arena.borrow();
        let mut subtree = Vec::new();
        let mut current = Some(self.id);
        while let Some(id) = current {
            subtree.push(id);
            current = arena.next_in_walk(id, self.id, true);
        }
        subtree
    }

    /// Detach every node of `subtree`, deepest first.
    fn teardown(&self, subtree: &[ScopeId]) -> Vec<Released> {
        let mut arena = self.shared.arena.borrow_mut();
        let mut tombstones = self.shared.tombstones.borrow_mut();
        let mut released = Vec::with_capacity(subtree.len());

        // Reverse walk order puts every node after all of its descendants.
        for &id in subtree.iter().rev() {
            let Some(node) = arena.get(id).filter(|node| !node.is_destroyed()) else {
                continue;
            };
            let parent = node.parent;
            let watchers = node.watcher_count as isize;
            let listeners: Vec<(String, isize)> = node
                .listener_counts
                .iter()
                .map(|(name, count)| (name.clone(), *count as isize))
                .collect();

            if let Some(parent) = parent {
                arena.add_watcher_count(parent, -watchers);
                for (name, count) in &listeners {
                    arena.add_listener_count(parent, name, -count);
                }
            }
            arena.unlink(id);
            if let Some(node) = arena.get_mut(id) {
                released.push(node.clear_for_tombstone());
            }
            tombstones.push(id);
        }
        released
    }
}
