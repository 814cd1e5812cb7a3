//! Arbor Core
//!
//! This crate provides the runtime for Arbor scope trees: hierarchical,
//! mutable state with dirty-checked change detection. It implements:
//!
//! - A tree of scopes with inherited or isolated state
//! - Watchers and the digest loop that runs them to a fixed point
//! - Async, apply-async and post-digest task queues
//! - An event bus that bubbles up or broadcasts down the tree
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: The dynamically typed values stored in scopes
//! - `tree`: Node storage, links and aggregate counts
//! - `scope`: Scope handles, root construction and lifecycle
//! - `watch`: Probes and watcher registration
//! - `digest`: The convergence loop
//! - `queue`: Deferred work and the external scheduler
//! - `event`: Emit and broadcast
//!
//! # Example
//!
//! ```rust
//! use arbor_core::{Scope, Value};
//!
//! let root = Scope::new_root();
//! let child = root.new_child();
//!
//! // Keep `total` in sync with `price * quantity`.
//! child.watch("price", |price: &Value, _: &Value, scope: &Scope| {
//!     let quantity = scope.get("quantity").as_f64().unwrap_or(0.0);
//!     scope.set("total", price.as_f64().unwrap_or(0.0) * quantity);
//! });
//!
//! root.set("quantity", 3);
//! child.set("price", 2.5);
//! root.apply(|_: &Scope| {}).unwrap();
//!
//! assert_eq!(child.get("total"), Value::from(7.5));
//! ```

pub mod config;
pub mod digest;
pub mod error;
pub mod event;
pub mod queue;
pub mod scope;
pub mod tree;
pub mod value;
pub mod watch;

pub use config::RootConfig;
pub use digest::{DirtyRecord, LapLog};
pub use error::{
    CallbackError, ErrorSink, IntoOutcome, RecordingErrorSink, ReportedError, ScopeError,
    TracingErrorSink,
};
pub use event::Event;
pub use queue::{DeferId, ManualScheduler, Scheduler, TokioScheduler};
pub use scope::{Locals, Phase, RootBuilder, Scope, WeakScope, DESTROY_EVENT};
pub use tree::ScopeId;
pub use value::{Array, Object, Value};
pub use watch::{Deregistration, Path, Probe, ProbeOutput, WatcherId};
