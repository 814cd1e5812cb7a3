//! Digest Loop
//!
//! The digest re-checks every watcher under a scope until a full lap finds
//! nothing dirty.
//!
//! # How It Works
//!
//! ```text
//!   digest(scope)
//!     enter $digest phase (fails if the tree is already busy)
//!     root only: cancel a scheduled apply_async flush and drain it now
//!     loop:
//!       drain the async queue
//!       lap: pre-order walk, for each scope
//!              skip if suspended
//!              check watchers in registration order
//!              descend unless suspended or nothing below is watched
//!       stop when the lap was clean and the async queue is empty
//!       fail once ttl extra laps have been used up
//!     leave the phase
//!     run post-digest callbacks
//! ```
//!
//! # Early Exit
//!
//! The loop remembers the last watcher that was dirty. When a later lap
//! reaches that watcher again and it is clean, every watcher has been seen
//! clean since the last change, so the digest stops without finishing the
//! lap. Registering or removing a watcher and running an async task all
//! clear the memory.

mod log;

use std::cell::Cell;
use std::rc::Rc;

pub use self::log::{DirtyRecord, LapLog};
use self::log::LOGGED_LAPS;

use crate::error::{Result, ScopeError};
use crate::scope::{Phase, PhaseGuard, Scope, WalkGuard};
use crate::tree::ScopeId;
use crate::watch::{Watcher, WatcherId};

/// Position of the digest inside one scope's watcher list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WatchCursor {
    scope: ScopeId,
    next: usize,
}

/// Digest bookkeeping that registry changes need to reach.
#[derive(Debug, Default)]
pub(crate) struct DigestState {
    pub(crate) last_dirty: Cell<Option<WatcherId>>,
    cursor: Cell<Option<WatchCursor>>,
}

impl DigestState {
    /// Keep the cursor on the same watcher after the entry at `index` of
    /// `scope`'s list was removed.
    pub(crate) fn step_back_if_before(&self, scope: ScopeId, index: usize) {
        if let Some(mut cursor) = self.cursor.get() {
            if cursor.scope == scope && index < cursor.next {
                cursor.next -= 1;
                self.cursor.set(Some(cursor));
            }
        }
    }
}

/// Result of checking one scope's watchers.
enum Check {
    Clean,
    Dirty,
    /// Reached the last dirty watcher and found it clean.
    Settled,
}

impl Scope {
    /// Run watchers under this scope until nothing changes.
    ///
    /// Fails with [`ScopeError::InProgress`] when called while the tree is
    /// digesting or applying, and with [`ScopeError::IterationLimit`] when
    /// watchers keep changing each other. Either way the tree is idle again
    /// when this returns.
    pub fn digest(&self) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        let shared = &*self.shared;
        let phase = PhaseGuard::begin(&shared.phase, Phase::Digest)?;

        let target = if shared.queues.has_async_tasks() {
            shared.root
        } else {
            self.id
        };
        if self.is_root() {
            self.flush_pending_apply_async();
        }

        shared.digest.last_dirty.set(None);
        let mut ttl = shared.config.ttl;
        let mut laps: Vec<LapLog> = Vec::new();
        let mut lap_count = 0usize;
        tracing::debug!(scope = %target, "digest started");

        loop {
            lap_count += 1;
            self.drain_async_queue();

            let mut log = (ttl < LOGGED_LAPS).then(LapLog::new);
            let dirty = self.run_lap(target, log.as_mut());
            if let Some(log) = log.filter(|log| !log.is_empty()) {
                laps.push(log);
            }

            if !dirty && !shared.queues.has_async_tasks() {
                break;
            }
            if ttl == 0 {
                tracing::warn!(ttl = shared.config.ttl, laps = lap_count, "digest did not settle");
                return Err(ScopeError::IterationLimit {
                    ttl: shared.config.ttl,
                    laps,
                });
            }
            ttl -= 1;
        }

        drop(phase);
        tracing::debug!(scope = %target, laps = lap_count, "digest settled");

        self.drain_post_digest();
        Ok(())
    }

    /// One pre-order walk from `target`. Returns whether anything fired.
    fn run_lap(&self, target: ScopeId, mut log: Option<&mut LapLog>) -> bool {
        let shared = &*self.shared;
        let _walk = WalkGuard::enter(shared);
        let mut dirty = false;

        let mut current = Some(target);
        while let Some(id) = current {
            let suspended = match shared.arena.borrow().get(id) {
                Some(node) => node.suspended,
                None => break,
            };
            if !suspended {
                match self.check_watchers(id, log.as_deref_mut()) {
                    Check::Settled => return false,
                    Check::Dirty => dirty = true,
                    Check::Clean => {}
                }
            }

            current = {
                let arena = shared.arena.borrow();
                let descend = arena
                    .get(id)
                    .is_some_and(|node| !node.suspended && node.watcher_count > 0);
                arena.next_in_walk(id, target, descend)
            };
        }
        dirty
    }

    fn check_watchers(&self, id: ScopeId, mut log: Option<&mut LapLog>) -> Check {
        let shared = &*self.shared;
        let scope = self.sibling_handle(id);
        let mut dirty = false;

        shared
            .digest
            .cursor
            .set(Some(WatchCursor { scope: id, next: 0 }));

        while let Some(watcher) = self.next_watcher(id) {
            let value = match watcher.probe.evaluate(&scope, None) {
                Ok(value) => value,
                Err(err) => {
                    shared.report(&*err, "watcher");
                    continue;
                }
            };
            let last = watcher.last.borrow().clone();
            let changed = match &last {
                None => true,
                Some(last) if watcher.deep => !value.deep_equals(last),
                Some(last) => !value.identical(last),
            };

            if !changed {
                if shared.digest.last_dirty.get() == Some(watcher.id) {
                    shared.digest.cursor.set(None);
                    return Check::Settled;
                }
                continue;
            }

            dirty = true;
            shared.digest.last_dirty.set(Some(watcher.id));
            *watcher.last.borrow_mut() = Some(if watcher.deep {
                value.deep_copy()
            } else {
                value.clone()
            });

            let old = last.as_ref().unwrap_or(&value);
            tracing::trace!(scope = %id, probe = %watcher.probe.label(), "watcher fired");
            if let Err(err) = (watcher.reaction)(&value, old, &scope) {
                shared.report(&*err, "watcher");
            }
            if let Some(log) = log.as_mut() {
                log.push(DirtyRecord {
                    expression: watcher.probe.label().to_string(),
                    new: value.clone(),
                    old: old.clone(),
                });
            }
            if watcher.once {
                scope.remove_watcher(watcher.id);
            }
        }

        shared.digest.cursor.set(None);
        if dirty {
            Check::Dirty
        } else {
            Check::Clean
        }
    }

    /// Take the watcher under the cursor and advance it.
    fn next_watcher(&self, id: ScopeId) -> Option<Rc<Watcher>> {
        let shared = &*self.shared;
        let mut cursor = shared.digest.cursor.get()?;
        let watcher = {
            let arena = shared.arena.borrow();
            Rc::clone(arena.live(id)?.watchers.get(cursor.next)?)
        };
        cursor.next += 1;
        shared.digest.cursor.set(Some(cursor));
        Some(watcher)
    }
}
