//! Collection Watchers
//!
//! A collection watcher fires when the *membership* of an array or object
//! changes: an element replaced, added or removed, or the value switching
//! between array, object and primitive. Changes inside an element do not
//! count.
//!
//! # How It Works
//!
//! The user probe is wrapped in a detector that keeps a shallow shadow of
//! the collection and bumps a counter every time the shadow has to be
//! corrected. A plain identity watcher on that counter then drives the
//! reaction, and the reaction is handed the real collection plus a shallow
//! copy of what it looked like at the previous call.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{CallbackError, IntoOutcome};
use crate::scope::Scope;
use crate::value::{Array, Object, Value};

use super::probe::Probe;
use super::watcher::{Deregistration, Watcher};

/// Shallow copy of the last collection seen.
#[derive(Default)]
enum Shadow {
    #[default]
    Empty,
    Primitive(Value),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

#[derive(Default)]
struct CollectionState {
    current: RefCell<Value>,
    shadow: RefCell<Shadow>,
    previous: RefCell<Value>,
    changes: Cell<u64>,
    fired: Cell<bool>,
}

impl CollectionState {
    /// Compare `value` against the shadow and return the change counter.
    fn detect(&self, value: Value) -> Value {
        *self.current.borrow_mut() = value.clone();
        if value.is_undefined() {
            return Value::Undefined;
        }

        let mut shadow = self.shadow.borrow_mut();
        let mut changes = self.changes.get();
        match &value {
            Value::Array(array) => {
                if !matches!(*shadow, Shadow::Array(_)) {
                    *shadow = Shadow::Array(Vec::new());
                    changes += 1;
                }
                if let Shadow::Array(old) = &mut *shadow {
                    let items = array.items();
                    if old.len() != items.len() {
                        old.resize(items.len(), Value::Undefined);
                        changes += 1;
                    }
                    for (slot, item) in old.iter_mut().zip(items.iter()) {
                        if !slot.identical(item) {
                            *slot = item.clone();
                            changes += 1;
                        }
                    }
                }
            }
            Value::Object(object) => {
                if !matches!(*shadow, Shadow::Object(_)) {
                    *shadow = Shadow::Object(IndexMap::new());
                    changes += 1;
                }
                if let Shadow::Object(old) = &mut *shadow {
                    let entries = object.map();
                    for (key, item) in entries.iter() {
                        match old.get_mut(key) {
                            Some(slot) => {
                                if !slot.identical(item) {
                                    *slot = item.clone();
                                    changes += 1;
                                }
                            }
                            None => {
                                old.insert(key.clone(), item.clone());
                                changes += 1;
                            }
                        }
                    }
                    if old.len() > entries.len() {
                        old.retain(|key, _| entries.contains_key(key));
                        changes += 1;
                    }
                }
            }
            primitive => {
                let same = matches!(&*shadow, Shadow::Primitive(old) if old.identical(primitive));
                if !same {
                    *shadow = Shadow::Primitive(primitive.clone());
                    changes += 1;
                }
            }
        }
        self.changes.set(changes);
        Value::Number(changes as f64)
    }

    fn react<F, R>(&self, reaction: &F, scope: &Scope) -> Result<(), CallbackError>
    where
        F: Fn(&Value, &Value, &Scope) -> R,
        R: IntoOutcome,
    {
        let current = self.current.borrow().clone();
        let outcome = if self.fired.replace(true) {
            let previous = self.previous.borrow().clone();
            reaction(&current, &previous, scope)
        } else {
            reaction(&current, &current, scope)
        };
        *self.previous.borrow_mut() = shallow_copy(&current);
        outcome.into_outcome()
    }
}

fn shallow_copy(value: &Value) -> Value {
    match value {
        Value::Array(array) => Value::Array(Array::from_vec(array.to_vec())),
        Value::Object(object) => {
            let copy = Object::new();
            for (key, item) in object.entries() {
                copy.insert(key, item);
            }
            Value::Object(copy)
        }
        other => other.clone(),
    }
}

impl Scope {
    /// Watch the membership of an array or object.
    ///
    /// On the first call the reaction receives the collection as both new
    /// and old. Afterwards `old` is a shallow copy of the collection as it
    /// was at the previous call.
    pub fn watch_collection<P, F, R>(&self, probe: P, reaction: F) -> Deregistration
    where
        P: Into<Probe>,
        F: Fn(&Value, &Value, &Scope) -> R + 'static,
        R: IntoOutcome,
    {
        let source = probe.into();
        let constant = source.is_constant();
        let state = Rc::new(CollectionState::default());

        let detector = {
            let state = Rc::clone(&state);
            let label = source.label();
            Probe::named_func(label, move |scope: &Scope| -> Result<Value, CallbackError> {
                let value = source.evaluate(scope, None)?;
                Ok(state.detect(value))
            })
        };

        let watcher = Watcher::new(
            detector,
            move |_: &Value, _: &Value, scope: &Scope| state.react(&reaction, scope),
            false,
        );
        self.register_watcher(if constant { watcher.once() } else { watcher })
    }
}
