//! Watchers
//!
//! Registration side of change detection. A watcher pairs a [`Probe`]
//! (what to read) with a reaction (what to do when it changes). The digest
//! loop in [`crate::digest`] decides when reactions run.
//!
//! Derived registrations are built from plain watchers:
//!
//! - [`Scope::watch_group`](crate::Scope::watch_group) fans several probes
//!   into one reaction.
//! - [`Scope::watch_collection`](crate::Scope::watch_collection) watches the
//!   membership of an array or object through a change counter.

mod collection;
mod group;
mod probe;
mod watcher;

pub use probe::{Path, Probe, ProbeOutput};
pub use watcher::{Deregistration, WatcherId};
pub(crate) use watcher::Watcher;
