//! Value comparison and copying.
//!
//! Both the structural comparison and the deep copy track the containers
//! they have already entered, so cyclic values terminate instead of
//! recursing forever.

use std::collections::{HashMap, HashSet};

use super::{Array, Object, Value};

impl Value {
    /// Reference equality for containers, value equality for primitives.
    ///
    /// `NaN` is identical to `NaN`, otherwise a watcher on `NaN` would never
    /// settle.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Structural equality. Arrays compare element-wise, objects compare
    /// key sets and values, `NaN` equals `NaN`.
    pub fn deep_equals(&self, other: &Value) -> bool {
        let mut entered = HashSet::new();
        deep_equals(self, other, &mut entered)
    }

    /// Copy the value and every container reachable from it.
    ///
    /// Shared sub-containers stay shared inside the copy, and cycles are
    /// reproduced rather than unrolled.
    pub fn deep_copy(&self) -> Value {
        let mut copies = HashMap::new();
        deep_copy(self, &mut copies)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.deep_equals(other)
    }
}

fn deep_equals(a: &Value, b: &Value, entered: &mut HashSet<(usize, usize)>) -> bool {
    if a.identical(b) {
        return true;
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            if x.len() != y.len() {
                return false;
            }
            // A pair already being compared further up the stack is assumed
            // equal; any real difference shows up elsewhere.
            if !entered.insert((x.addr(), y.addr())) {
                return true;
            }
            let left = x.items();
            let right = y.items();
            let equal = left
                .iter()
                .zip(right.iter())
                .all(|(l, r)| deep_equals(l, r, entered));
            equal
        }
        (Value::Object(x), Value::Object(y)) => {
            if x.len() != y.len() {
                return false;
            }
            if !entered.insert((x.addr(), y.addr())) {
                return true;
            }
            let left = x.map();
            let right = y.map();
            let equal = left.iter().all(|(key, l)| match right.get(key) {
                Some(r) => deep_equals(l, r, entered),
                None => false,
            });
            equal
        }
        _ => false,
    }
}

fn deep_copy(value: &Value, copies: &mut HashMap<usize, Value>) -> Value {
    match value {
        Value::Array(source) => {
            if let Some(copy) = copies.get(&source.addr()) {
                return copy.clone();
            }
            let target = Array::new();
            copies.insert(source.addr(), Value::Array(target.clone()));
            for item in source.to_vec() {
                target.push(deep_copy(&item, copies));
            }
            Value::Array(target)
        }
        Value::Object(source) => {
            if let Some(copy) = copies.get(&source.addr()) {
                return copy.clone();
            }
            let target = Object::new();
            copies.insert(source.addr(), Value::Object(target.clone()));
            for (key, item) in source.entries() {
                target.insert(key, deep_copy(&item, copies));
            }
            Value::Object(target)
        }
        primitive => primitive.clone(),
    }
}
