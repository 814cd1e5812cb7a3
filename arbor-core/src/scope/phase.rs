//! Phase and Walk Guards
//!
//! A tree is in at most one phase at a time: idle, applying, or digesting.
//! The phase lives on the tree's shared state and is entered through
//! [`PhaseGuard`], which clears it again when dropped. Because the clear
//! happens in `Drop`, an early return (`?`, an iteration-limit abort) or a
//! panic unwinding out of user code can never leave the tree stuck in a
//! phase.
//!
//! [`WalkGuard`] counts the traversals (digest laps, event dispatches)
//! currently standing somewhere in the tree. While the count is non-zero,
//! destroyed nodes stay in the arena as tombstones so the walkers can step
//! past them; the last guard to drop sweeps them.

use std::cell::Cell;
use std::fmt;

use super::shared::Shared;
use crate::error::{Result, ScopeError};

/// What the tree is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// A digest is running.
    Digest,

    /// An `apply` callback is running (its digest has not started yet).
    Apply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Digest => f.write_str("$digest"),
            Phase::Apply => f.write_str("$apply"),
        }
    }
}

/// Guard that clears the tree's phase when dropped.
pub(crate) struct PhaseGuard<'a> {
    slot: &'a Cell<Option<Phase>>,
    phase: Phase,
}

impl<'a> PhaseGuard<'a> {
    /// Enter `phase`, failing if any phase is already active.
    pub(crate) fn begin(slot: &'a Cell<Option<Phase>>, phase: Phase) -> Result<Self> {
        if let Some(current) = slot.get() {
            return Err(ScopeError::InProgress { phase: current });
        }
        slot.set(Some(phase));
        Ok(Self { slot, phase })
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.slot.get(),
            Some(self.phase),
            "phase changed underneath its guard"
        );
        self.slot.set(None);
    }
}

/// Guard that marks a traversal as in progress.
pub(crate) struct WalkGuard<'a> {
    shared: &'a Shared,
}

impl<'a> WalkGuard<'a> {
    pub(crate) fn enter(shared: &'a Shared) -> Self {
        shared.walks.set(shared.walks.get() + 1);
        Self { shared }
    }
}

impl Drop for WalkGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.shared.walks.get().saturating_sub(1);
        self.shared.walks.set(remaining);
        if remaining == 0 {
            self.shared.sweep_tombstones();
        }
    }
}
