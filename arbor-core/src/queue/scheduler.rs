//! Deferred Execution
//!
//! The engine never sleeps or spawns on its own. When it needs "run this
//! after the current synchronous turn" it asks the tree's [`Scheduler`].
//!
//! Two schedulers ship with the crate:
//!
//! - [`ManualScheduler`] queues tasks until the host calls
//!   [`flush`](ManualScheduler::flush). Deterministic, and the default.
//! - [`TokioScheduler`] runs each task on the current `LocalSet` after one
//!   `yield_now`, and cancels through the task's `AbortHandle`.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::AbortHandle;

/// A task handed to a scheduler.
pub type Deferred = Box<dyn FnOnce()>;

/// Identifies a deferred task so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeferId(u64);

impl DeferId {
    /// Generate a new unique id. For use by [`Scheduler`] implementations.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Runs tasks later, exactly once, unless cancelled first.
pub trait Scheduler {
    fn defer(&self, task: Deferred) -> DeferId;

    /// Cancel a task that has not started. Returns whether it was pending.
    fn cancel(&self, id: DeferId) -> bool;
}

// ----------------------------------------------------------------------------
// Manual
// ----------------------------------------------------------------------------

/// Scheduler driven by the host.
#[derive(Default)]
pub struct ManualScheduler {
    pending: RefCell<VecDeque<(DeferId, Deferred)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    /// Run the oldest pending task. Returns `false` if there was none.
    pub fn run_next(&self) -> bool {
        let next = self.pending.borrow_mut().pop_front();
        match next {
            Some((_, task)) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run pending tasks, including ones deferred while flushing, until none
    /// are left. Returns how many ran.
    pub fn flush(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn defer(&self, task: Deferred) -> DeferId {
        let id = DeferId::next();
        self.pending.borrow_mut().push_back((id, task));
        id
    }

    fn cancel(&self, id: DeferId) -> bool {
        let removed = {
            let mut pending = self.pending.borrow_mut();
            pending
                .iter()
                .position(|(pending_id, _)| *pending_id == id)
                .and_then(|index| pending.remove(index))
        };
        removed.is_some()
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tokio
// ----------------------------------------------------------------------------

/// Scheduler backed by `tokio::task::spawn_local`.
///
/// Must be used from inside a `tokio::task::LocalSet`; `defer` panics
/// otherwise, as `spawn_local` does.
#[derive(Default)]
pub struct TokioScheduler {
    running: Rc<RefCell<HashMap<DeferId, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks spawned but not yet started.
    pub fn pending(&self) -> usize {
        self.running.borrow().len()
    }
}

impl Scheduler for TokioScheduler {
    fn defer(&self, task: Deferred) -> DeferId {
        let id = DeferId::next();
        let running = Rc::downgrade(&self.running);
        let handle = tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            if let Some(running) = running.upgrade() {
                running.borrow_mut().remove(&id);
            }
            task();
        });
        self.running.borrow_mut().insert(id, handle.abort_handle());
        id
    }

    fn cancel(&self, id: DeferId) -> bool {
        let handle = self.running.borrow_mut().remove(&id);
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}
