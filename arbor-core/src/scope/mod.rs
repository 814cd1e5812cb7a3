//! Scopes
//!
//! This module implements the public face of a scope tree.
//!
//! # How It Works
//!
//! Every tree has one [`Shared`](shared::Shared) block holding the node
//! arena, the phase flag, the task queues and the injected collaborators
//! (error sink and scheduler). A [`Scope`] is an `Rc` to that block plus a
//! node id, so handles are cheap to clone and compare.
//!
//! ```text
//!   Scope ──┐
//!   Scope ──┼──► Shared { arena, phase, queues, sink, scheduler }
//!   Scope ──┘        │
//!                    └── ScopeArena: ScopeId → ScopeNode
//! ```
//!
//! The types are `!Send`: a tree lives on one thread and every entry point
//! runs to completion before returning.

mod handle;
mod lifecycle;
mod phase;
pub(crate) mod shared;

pub use handle::{Locals, RootBuilder, Scope, WeakScope};
pub use lifecycle::DESTROY_EVENT;
pub use phase::Phase;
pub(crate) use phase::{PhaseGuard, WalkGuard};
