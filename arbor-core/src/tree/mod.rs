//! Scope Tree Storage
//!
//! This module implements the storage behind a scope tree: an arena of
//! nodes indexed by [`ScopeId`], with parent/child/sibling links expressed
//! as IDs rather than pointers.
//!
//! # Design Decisions
//!
//! 1. A centralized arena rather than `Rc` links between nodes because:
//!    - handles to destroyed scopes become inert by construction (the ID no
//!      longer resolves to a live node)
//!    - there are no reference cycles between parents and children
//!    - a walk can hold a plain `ScopeId` cursor while user code mutates the
//!      tree underneath it
//!
//! 2. Aggregate counts (watchers, listeners per event) are cached per node
//!    and maintained incrementally, so the digest and broadcast can prune
//!    whole subtrees in O(1).

mod arena;
mod node;

pub(crate) use arena::ScopeArena;
pub(crate) use node::{Lifecycle, ListenerSlots, Released, ScopeNode};
pub use node::ScopeId;
