//! Watch groups: one reaction over several probes.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{CallbackError, IntoOutcome};
use crate::scope::Scope;
use crate::value::Value;

use super::probe::Probe;
use super::watcher::Deregistration;

type GroupReaction = Rc<dyn Fn(&[Value], &[Value], &Scope) -> Result<(), CallbackError>>;

/// Values shared between the member watchers of one group.
struct GroupState {
    current: RefCell<Vec<Value>>,
    previous: RefCell<Vec<Value>>,
    scheduled: Cell<bool>,
    first_run: Cell<bool>,
}

impl GroupState {
    fn new(len: usize) -> Self {
        Self {
            current: RefCell::new(vec![Value::Undefined; len]),
            previous: RefCell::new(vec![Value::Undefined; len]),
            scheduled: Cell::new(false),
            first_run: Cell::new(true),
        }
    }

    fn fire(&self, reaction: &GroupReaction, scope: &Scope) -> Result<(), CallbackError> {
        self.scheduled.set(false);
        let current = self.current.borrow().clone();
        let outcome = if self.first_run.replace(false) {
            reaction(&current, &current, scope)
        } else {
            let previous = self.previous.borrow().clone();
            reaction(&current, &previous, scope)
        };
        *self.previous.borrow_mut() = current;
        outcome
    }
}

impl Scope {
    /// Watch several probes with one reaction.
    ///
    /// The reaction receives the current and previous values of every
    /// member, in probe order, and runs at most once per lap however many
    /// members changed. An empty group still fires once.
    pub fn watch_group<I, P, F, R>(&self, probes: I, reaction: F) -> Deregistration
    where
        I: IntoIterator<Item = P>,
        P: Into<Probe>,
        F: Fn(&[Value], &[Value], &Scope) -> R + 'static,
        R: IntoOutcome,
    {
        if self.is_destroyed() {
            return Deregistration::inert();
        }
        let mut probes: Vec<Probe> = probes.into_iter().map(Into::into).collect();
        let reaction: GroupReaction = Rc::new(move |current: &[Value], previous: &[Value], scope: &Scope| {
            reaction(current, previous, scope).into_outcome()
        });

        match probes.len() {
            0 => {
                let live = Rc::new(Cell::new(true));
                let should_call = Rc::clone(&live);
                self.eval_async(move |scope| {
                    if should_call.get() {
                        reaction(&[], &[], scope)
                    } else {
                        Ok(())
                    }
                });
                Deregistration::new(move || live.set(false))
            }
            1 => {
                let probe = probes.remove(0);
                self.watch(probe, move |new: &Value, old: &Value, scope: &Scope| {
                    reaction(std::slice::from_ref(new), std::slice::from_ref(old), scope)
                })
            }
            len => {
                let state = Rc::new(GroupState::new(len));
                let members: Vec<Deregistration> = probes
                    .into_iter()
                    .enumerate()
                    .map(|(index, probe)| {
                        let state = Rc::clone(&state);
                        let reaction = Rc::clone(&reaction);
                        self.watch(probe, move |value: &Value, _: &Value, scope: &Scope| {
                            state.current.borrow_mut()[index] = value.clone();
                            if !state.scheduled.replace(true) {
                                let state = Rc::clone(&state);
                                let reaction = Rc::clone(&reaction);
                                scope.eval_async(move |scope| state.fire(&reaction, scope));
                            }
                        })
                    })
                    .collect();
                Deregistration::new(move || {
                    for member in &members {
                        member.deregister();
                    }
                })
            }
        }
    }
}
