//! Probes
//!
//! A probe is how a watcher reads the value it observes. The shape of a
//! probe is resolved once, when it is built:
//!
//! - `Function`: an arbitrary read-only function of the scope.
//! - `Path`: a dotted property path such as `user.address.0.city`.
//! - `Constant`: a value that can never change. Watchers on a constant are
//!   removed right after their first check.

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::CallbackError;
use crate::scope::{Locals, Scope};
use crate::value::Value;

type ProbeFn = Rc<dyn Fn(&Scope) -> Result<Value, CallbackError>>;

/// What a probe function may return.
pub trait ProbeOutput {
    fn into_probe_result(self) -> Result<Value, CallbackError>;
}

impl ProbeOutput for Value {
    fn into_probe_result(self) -> Result<Value, CallbackError> {
        Ok(self)
    }
}

impl<E> ProbeOutput for Result<Value, E>
where
    E: Into<CallbackError>,
{
    fn into_probe_result(self) -> Result<Value, CallbackError> {
        self.map_err(Into::into)
    }
}

/// A way of reading a value from a scope.
#[derive(Clone)]
pub enum Probe {
    Function { label: Rc<str>, eval: ProbeFn },
    Path(Path),
    Constant(Value),
}

impl Probe {
    /// Build a probe from a function.
    pub fn func<F, R>(eval: F) -> Probe
    where
        F: Fn(&Scope) -> R + 'static,
        R: ProbeOutput,
    {
        Probe::named_func("fn", eval)
    }

    /// Build a probe from a function, with the label used in digest
    /// diagnostics.
    pub fn named_func<F, R>(label: impl Into<Rc<str>>, eval: F) -> Probe
    where
        F: Fn(&Scope) -> R + 'static,
        R: ProbeOutput,
    {
        Probe::Function {
            label: label.into(),
            eval: Rc::new(move |scope: &Scope| eval(scope).into_probe_result()),
        }
    }

    pub fn constant(value: impl Into<Value>) -> Probe {
        Probe::Constant(value.into())
    }

    /// Parse a declarative probe.
    ///
    /// JSON literals (`42`, `true`, `null`, `"text"`, `[1, 2]`) and
    /// single-quoted strings are constants, an empty source is the constant
    /// `undefined`, and anything else is a property path.
    pub fn parse(source: &str) -> Probe {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Probe::Constant(Value::Undefined);
        }
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return Probe::Constant(Value::from(json));
        }
        if let Some(text) = trimmed
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
        {
            return Probe::Constant(Value::from(text));
        }
        Probe::Path(Path::new(trimmed))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Probe::Constant(_))
    }

    /// Name used for this probe in diagnostics.
    pub fn label(&self) -> Rc<str> {
        match self {
            Probe::Function { label, .. } => Rc::clone(label),
            Probe::Path(path) => Rc::clone(&path.source),
            Probe::Constant(value) => Rc::from(value.to_string()),
        }
    }

    /// Read the probe's current value.
    pub fn evaluate(&self, scope: &Scope, locals: Option<&Locals>) -> Result<Value, CallbackError> {
        match self {
            Probe::Function { eval, .. } => eval(scope),
            Probe::Path(path) => Ok(path.resolve(scope, locals)),
            Probe::Constant(value) => Ok(value.clone()),
        }
    }
}

impl From<&str> for Probe {
    fn from(source: &str) -> Self {
        Probe::parse(source)
    }
}

impl From<String> for Probe {
    fn from(source: String) -> Self {
        Probe::parse(&source)
    }
}

impl From<Path> for Probe {
    fn from(path: Path) -> Self {
        Probe::Path(path)
    }
}

impl From<Value> for Probe {
    fn from(value: Value) -> Self {
        Probe::Constant(value)
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Function { label, .. } => f.debug_tuple("Function").field(label).finish(),
            Probe::Path(path) => f.debug_tuple("Path").field(&path.source).finish(),
            Probe::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
        }
    }
}

/// A dotted property path.
#[derive(Debug, Clone)]
pub struct Path {
    source: Rc<str>,
    segments: SmallVec<[Rc<str>; 4]>,
}

impl Path {
    pub fn new(source: &str) -> Path {
        Path {
            source: Rc::from(source),
            segments: source.split('.').map(|s| Rc::from(s.trim())).collect(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Resolve against a scope. The first segment is looked up in `locals`
    /// before the scope. Missing links yield `Undefined`.
    pub fn resolve(&self, scope: &Scope, locals: Option<&Locals>) -> Value {
        let mut segments = self.segments.iter();
        let Some(head) = segments.next() else {
            return Value::Undefined;
        };
        let mut value = match locals.and_then(|locals| locals.get(&**head)) {
            Some(local) => local.clone(),
            None => scope.get(head),
        };
        for segment in segments {
            if value.is_undefined() {
                break;
            }
            value = value.property(segment);
        }
        value
    }
}
