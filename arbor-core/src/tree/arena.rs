//! Scope Arena
//!
//! The arena owns every node of one tree and maintains the structural
//! invariants between them:
//!
//! 1. Children of a node form a doubly linked list (`child_head` /
//!    `child_tail`, `prev_sibling` / `next_sibling`) in creation order, so
//!    attaching and detaching are O(1).
//!
//! 2. `watcher_count` and `listener_counts` on every node are the sum over
//!    the node's subtree. Deltas are pushed up the parent chain instead of
//!    re-walking subtrees.
//!
//! 3. A detached node keeps its `parent` and `next_sibling` links. A walk
//!    that is standing on the node when it is detached can still step to
//!    where the node used to be followed.

use std::collections::HashMap;

use super::node::{ScopeId, ScopeNode};

/// All nodes of one scope tree, indexed by ID.
#[derive(Debug, Default)]
pub(crate) struct ScopeArena {
    nodes: HashMap<ScopeId, ScopeNode>,
}

impl ScopeArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a node with no parent.
    pub(crate) fn insert_root(&mut self, node: ScopeNode) -> ScopeId {
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Add `node` as the last child of `parent`.
    ///
    /// Returns `None` if the parent is not in the arena.
    pub(crate) fn attach_child(&mut self, parent: ScopeId, mut node: ScopeNode) -> Option<ScopeId> {
        let id = node.id;
        let tail = self.nodes.get(&parent)?.child_tail;

        node.parent = Some(parent);
        node.prev_sibling = tail;
        node.next_sibling = None;
        self.nodes.insert(id, node);

        if let Some(tail_id) = tail {
            if let Some(tail_node) = self.nodes.get_mut(&tail_id) {
                tail_node.next_sibling = Some(id);
            }
        }
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            if parent_node.child_head.is_none() {
                parent_node.child_head = Some(id);
            }
            parent_node.child_tail = Some(id);
        }
        Some(id)
    }

    /// Remove `id` from its parent's child list.
    ///
    /// The node's own `parent` and `next_sibling` links are left in place.
    pub(crate) fn unlink(&mut self, id: ScopeId) {
        let (parent, prev, next) = match self.nodes.get(&id) {
            Some(node) => (node.parent, node.prev_sibling, node.next_sibling),
            None => return,
        };

        if let Some(parent_node) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            if parent_node.child_head == Some(id) {
                parent_node.child_head = next;
            }
            if parent_node.child_tail == Some(id) {
                parent_node.child_tail = prev;
            }
        }
        if let Some(prev_node) = prev.and_then(|p| self.nodes.get_mut(&p)) {
            prev_node.next_sibling = next;
        }
        if let Some(next_node) = next.and_then(|n| self.nodes.get_mut(&n)) {
            next_node.prev_sibling = prev;
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.prev_sibling = None;
        }
    }

    pub(crate) fn get(&self, id: ScopeId) -> Option<&ScopeNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ScopeId) -> Option<&mut ScopeNode> {
        self.nodes.get_mut(&id)
    }

    /// The node, if it exists and has not been torn down.
    pub(crate) fn live(&self, id: ScopeId) -> Option<&ScopeNode> {
        self.nodes.get(&id).filter(|node| node.is_live())
    }

    pub(crate) fn live_mut(&mut self, id: ScopeId) -> Option<&mut ScopeNode> {
        self.nodes.get_mut(&id).filter(|node| node.is_live())
    }

    pub(crate) fn remove(&mut self, id: ScopeId) -> Option<ScopeNode> {
        self.nodes.remove(&id)
    }

    /// Add `delta` to the watcher count of `id` and every ancestor.
    pub(crate) fn add_watcher_count(&mut self, id: ScopeId, delta: isize) {
        let mut current = Some(id);
        while let Some(cur) = current {
            let Some(node) = self.nodes.get_mut(&cur) else {
                break;
            };
            node.watcher_count = node.watcher_count.saturating_add_signed(delta);
            current = node.parent;
        }
    }

    /// Add `delta` to the `name` listener count of `id` and every ancestor.
    ///
    /// Counts that fall to zero are removed from the table.
    pub(crate) fn add_listener_count(&mut self, id: ScopeId, name: &str, delta: isize) {
        let mut current = Some(id);
        while let Some(cur) = current {
            let Some(node) = self.nodes.get_mut(&cur) else {
                break;
            };
            let count = node.listener_counts.entry(name.to_string()).or_insert(0);
            *count = count.saturating_add_signed(delta);
            if *count == 0 {
                node.listener_counts.remove(name);
            }
            current = node.parent;
        }
    }

    /// Children of `id` in creation order.
    #[cfg(test)]
    pub(crate) fn children(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut children = Vec::new();
        let mut child = self.nodes.get(&id).and_then(|node| node.child_head);
        while let Some(c) = child {
            children.push(c);
            child = self.nodes.get(&c).and_then(|node| node.next_sibling);
        }
        children
    }

    /// Number of scopes below `id`, excluding `id` itself.
    pub(crate) fn count_descendants(&self, id: ScopeId) -> usize {
        let mut count = 0;
        let mut current = self.next_in_walk(id, id, true);
        while let Some(next) = current {
            count += 1;
            current = self.next_in_walk(next, id, true);
        }
        count
    }

    /// Next node of a pre-order walk rooted at `target`.
    ///
    /// When `descend` is true and `current` has children, the walk moves to
    /// the first child; otherwise it moves to the next sibling, climbing
    /// parents until one has a next sibling or `target` is reached.
    pub(crate) fn next_in_walk(
        &self,
        current: ScopeId,
        target: ScopeId,
        descend: bool,
    ) -> Option<ScopeId> {
        if descend {
            if let Some(head) = self.nodes.get(&current).and_then(|node| node.child_head) {
                return Some(head);
            }
        }
        let mut cursor = current;
        loop {
            if cursor == target {
                return None;
            }
            let node = self.nodes.get(&cursor)?;
            if let Some(next) = node.next_sibling {
                return Some(next);
            }
            cursor = node.parent?;
        }
    }

    /// Get the total number of nodes in the arena, tombstones included.
    #[cfg(test)]
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
