//! Task Queues
//!
//! Work that must run "soon, inside a digest" rather than right now.
//!
//! # Queues
//!
//! Each tree owns three FIFO queues:
//!
//! 1. **Async** (`eval_async`): drained at the start of every digest lap.
//!    The first task queued while the tree is idle also asks the scheduler
//!    for a deferred digest, so the queue drains even if nobody digests.
//!
//! 2. **Apply-async** (`apply_async`): calls made in the same turn share a
//!    single deferred `apply`. A root digest that runs before the deferred
//!    flush cancels it and drains the queue itself.
//!
//! 3. **Post-digest** (`post_digest`): run once, after a digest has settled
//!    and left its phase, so a callback may digest again.
//!
//! `apply` is the synchronous entry point: run a callback, then digest from
//! the root.

mod scheduler;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

pub use scheduler::{DeferId, Deferred, ManualScheduler, Scheduler, TokioScheduler};

use crate::error::{CallbackError, IntoOutcome, Result};
use crate::scope::{Locals, Phase, PhaseGuard, Scope};
use crate::tree::ScopeId;

type Task = Box<dyn FnOnce(&Scope, &Locals) -> std::result::Result<(), CallbackError>>;
type Call = Box<dyn FnOnce(&Scope) -> std::result::Result<(), CallbackError>>;

/// An `eval_async` task.
pub(crate) struct AsyncTask {
    scope: ScopeId,
    locals: Locals,
    run: Task,
}

/// An `apply_async` or post-digest callback.
pub(crate) struct QueuedCall {
    scope: ScopeId,
    run: Call,
}

/// What was still queued when a tree was torn down.
pub(crate) struct Drained {
    _async_tasks: VecDeque<AsyncTask>,
    _apply_async: VecDeque<QueuedCall>,
    _post_digest: VecDeque<QueuedCall>,
}

/// The queues of one tree.
#[derive(Default)]
pub(crate) struct Queues {
    async_tasks: RefCell<VecDeque<AsyncTask>>,
    apply_async: RefCell<VecDeque<QueuedCall>>,
    /// The scheduled apply-async flush, if any.
    apply_async_flush: Cell<Option<DeferId>>,
    post_digest: RefCell<VecDeque<QueuedCall>>,
}

impl Queues {
    pub(crate) fn has_async_tasks(&self) -> bool {
        !self.async_tasks.borrow().is_empty()
    }

    fn pop_async(&self) -> Option<AsyncTask> {
        self.async_tasks.borrow_mut().pop_front()
    }

    fn pop_apply_async(&self) -> Option<QueuedCall> {
        self.apply_async.borrow_mut().pop_front()
    }

    fn pop_post_digest(&self) -> Option<QueuedCall> {
        self.post_digest.borrow_mut().pop_front()
    }

    /// Empty every queue. Returns the scheduled flush that should be
    /// cancelled and the dropped work, to be released by the caller.
    pub(crate) fn clear(&self) -> (Option<DeferId>, Drained) {
        let drained = Drained {
            _async_tasks: std::mem::take(&mut *self.async_tasks.borrow_mut()),
            _apply_async: std::mem::take(&mut *self.apply_async.borrow_mut()),
            _post_digest: std::mem::take(&mut *self.post_digest.borrow_mut()),
        };
        (self.apply_async_flush.take(), drained)
    }
}

impl Scope {
    /// Run `task` at the start of the next digest lap.
    pub fn eval_async<F, R>(&self, task: F)
    where
        F: FnOnce(&Scope) -> R + 'static,
        R: IntoOutcome,
    {
        self.eval_async_with(Locals::new(), move |scope, _| task(scope));
    }

    /// Like [`eval_async`](Self::eval_async), handing `locals` to the task.
    pub fn eval_async_with<F, R>(&self, locals: Locals, task: F)
    where
        F: FnOnce(&Scope, &Locals) -> R + 'static,
        R: IntoOutcome,
    {
        if self.is_destroyed() {
            return;
        }
        let shared = &*self.shared;
        if shared.phase.get().is_none() && !shared.queues.has_async_tasks() {
            let tree = Rc::downgrade(&self.shared);
            let root = shared.root;
            shared.scheduler.defer(Box::new(move || {
                let Some(shared) = tree.upgrade() else {
                    return;
                };
                if !shared.queues.has_async_tasks() {
                    return;
                }
                let root = Scope { shared, id: root };
                if let Err(err) = root.digest() {
                    root.shared.report(&err, "evalAsync");
                }
            }));
            tracing::debug!(scope = %self.id, "deferred digest scheduled for async queue");
        }

        shared.queues.async_tasks.borrow_mut().push_back(AsyncTask {
            scope: self.id,
            locals,
            run: Box::new(move |scope: &Scope, locals: &Locals| task(scope, locals).into_outcome()),
        });
    }

    /// Run `f` against this scope, then digest the whole tree.
    ///
    /// An error from `f` is reported and does not stop the digest. Fails
    /// without running `f` if the tree is already digesting or applying.
    /// Engine errors are reported to the sink as well as returned.
    pub fn apply<F, R>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Scope) -> R,
        R: IntoOutcome,
    {
        if self.is_destroyed() {
            return Ok(());
        }
        let shared = &*self.shared;
        {
            let _phase = match PhaseGuard::begin(&shared.phase, Phase::Apply) {
                Ok(guard) => guard,
                Err(err) => {
                    shared.sink.report(&err, None);
                    return Err(err);
                }
            };
            if let Err(err) = f(self).into_outcome() {
                shared.report(&*err, "apply");
            }
        }

        self.root().digest().map_err(|err| {
            shared.sink.report(&err, None);
            err
        })
    }

    /// Queue `f` for a coalesced, deferred [`apply`](Self::apply).
    pub fn apply_async<F, R>(&self, f: F)
    where
        F: FnOnce(&Scope) -> R + 'static,
        R: IntoOutcome,
    {
        if self.is_destroyed() {
            return;
        }
        self.shared.queues.apply_async.borrow_mut().push_back(QueuedCall {
            scope: self.id,
            run: Box::new(move |scope: &Scope| f(scope).into_outcome()),
        });
        self.schedule_apply_async();
    }

    /// Run `f` once, after the next digest settles.
    pub fn post_digest<F, R>(&self, f: F)
    where
        F: FnOnce(&Scope) -> R + 'static,
        R: IntoOutcome,
    {
        self.shared.queues.post_digest.borrow_mut().push_back(QueuedCall {
            scope: self.id,
            run: Box::new(move |scope: &Scope| f(scope).into_outcome()),
        });
    }

    fn schedule_apply_async(&self) {
        let shared = &*self.shared;
        if shared.queues.apply_async_flush.get().is_some() {
            return;
        }
        let tree = Rc::downgrade(&self.shared);
        let root = shared.root;
        let id = shared.scheduler.defer(Box::new(move || {
            let Some(shared) = tree.upgrade() else {
                return;
            };
            let root = Scope { shared, id: root };
            // apply reports its own failures.
            let _ = root.apply(|root: &Scope| root.drain_apply_async());
        }));
        shared.queues.apply_async_flush.set(Some(id));
        tracing::debug!(scope = %self.id, "apply_async flush scheduled");
    }

    /// Cancel a scheduled apply-async flush and run the queue now.
    pub(crate) fn flush_pending_apply_async(&self) {
        let Some(id) = self.shared.queues.apply_async_flush.get() else {
            return;
        };
        self.shared.scheduler.cancel(id);
        tracing::debug!("apply_async flush cancelled by digest");
        self.drain_apply_async();
    }

    pub(crate) fn drain_apply_async(&self) {
        while let Some(QueuedCall { scope, run }) = self.shared.queues.pop_apply_async() {
            let scope = self.sibling_handle(scope);
            if scope.is_destroyed() {
                continue;
            }
            if let Err(err) = run(&scope) {
                self.shared.report(&*err, "applyAsync");
            }
        }
        self.shared.queues.apply_async_flush.set(None);
    }

    pub(crate) fn drain_async_queue(&self) {
        while let Some(AsyncTask { scope, locals, run }) = self.shared.queues.pop_async() {
            let scope = self.sibling_handle(scope);
            if scope.is_destroyed() {
                continue;
            }
            if let Err(err) = run(&scope, &locals) {
                self.shared.report(&*err, "evalAsync");
            }
            self.shared.digest.last_dirty.set(None);
        }
    }

    pub(crate) fn drain_post_digest(&self) {
        while let Some(QueuedCall { scope, run }) = self.shared.queues.pop_post_digest() {
            let scope = self.sibling_handle(scope);
            if let Err(err) = run(&scope) {
                self.shared.report(&*err, "postDigest");
            }
        }
    }
}
