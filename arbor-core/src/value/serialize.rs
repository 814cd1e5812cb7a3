//! Serialization of scope values.
//!
//! Values serialize as their JSON shape. `Undefined` serializes as `null`,
//! integral numbers serialize as integers, and a container that is already
//! being serialized further up the stack is written as `"[Circular]"`.

use std::cell::RefCell;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use super::Value;

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

const CIRCULAR: &str = "[Circular]";

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let stack = RefCell::new(Vec::new());
        Guarded { value: self, stack: &stack }.serialize(serializer)
    }
}

/// A value plus the addresses of the containers currently being written.
struct Guarded<'a> {
    value: &'a Value,
    stack: &'a RefCell<Vec<usize>>,
}

impl Guarded<'_> {
    fn enter(&self, addr: usize) -> bool {
        let mut stack = self.stack.borrow_mut();
        if stack.contains(&addr) {
            return false;
        }
        stack.push(addr);
        true
    }

    fn leave(&self) {
        self.stack.borrow_mut().pop();
    }
}

impl Serialize for Guarded<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value {
            Value::Undefined | Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(array) => {
                if !self.enter(array.addr()) {
                    return serializer.serialize_str(CIRCULAR);
                }
                let items = array.to_vec();
                let result = (|| {
                    let mut seq = serializer.serialize_seq(Some(items.len()))?;
                    for item in &items {
                        seq.serialize_element(&Guarded { value: item, stack: self.stack })?;
                    }
                    seq.end()
                })();
                self.leave();
                result
            }
            Value::Object(object) => {
                if !self.enter(object.addr()) {
                    return serializer.serialize_str(CIRCULAR);
                }
                let entries = object.entries();
                let result = (|| {
                    let mut map = serializer.serialize_map(Some(entries.len()))?;
                    for (key, item) in &entries {
                        map.serialize_entry(key, &Guarded { value: item, stack: self.stack })?;
                    }
                    map.end()
                })();
                self.leave();
                result
            }
        }
    }
}
