//! Error Types
//!
//! Two families of failure flow through the engine:
//!
//! - [`ScopeError`] is returned to the caller of an engine entry point
//!   (`digest`, `apply`, builder validation). These are fatal to the call
//!   that triggered them.
//!
//! - [`CallbackError`] is what user code (probes, reactions, listeners,
//!   queued tasks) hands back. These are never returned to the caller; they
//!   are caught at the call site and passed to the tree's [`ErrorSink`], and
//!   evaluation carries on with the next callback.

use std::cell::RefCell;
use std::fmt;

use crate::digest::LapLog;
use crate::scope::Phase;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Error produced by user callbacks.
pub type CallbackError = Box<dyn std::error::Error + 'static>;

/// Errors returned by engine entry points.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// A digest or apply was requested while another one is running
    /// somewhere in the same tree.
    #[error("{phase} already in progress")]
    InProgress { phase: Phase },

    /// The digest did not settle within the configured number of laps.
    #[error(
        "{ttl} digest() iterations reached. Aborting!\nWatchers fired in the last {} iterations: {}",
        laps.len(),
        render_laps(laps)
    )]
    IterationLimit { ttl: usize, laps: Vec<LapLog> },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn render_laps(laps: &[LapLog]) -> String {
    let rendered: Vec<String> = laps
        .iter()
        .map(|lap| {
            let records: Vec<String> = lap.iter().map(|r| r.to_string()).collect();
            format!("[{}]", records.join(","))
        })
        .collect();
    format!("[{}]", rendered.join(","))
}

/// Converts a callback's return value into an outcome the engine can report.
///
/// Implemented for `()` (infallible callbacks) and for
/// `Result<(), E>` where `E` converts into [`CallbackError`].
pub trait IntoOutcome {
    fn into_outcome(self) -> std::result::Result<(), CallbackError>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> std::result::Result<(), CallbackError> {
        Ok(())
    }
}

impl<E> IntoOutcome for std::result::Result<(), E>
where
    E: Into<CallbackError>,
{
    fn into_outcome(self) -> std::result::Result<(), CallbackError> {
        self.map_err(Into::into)
    }
}

/// The single collaborator every internal catch site reports to.
///
/// The engine never decides how errors are displayed; it only guarantees
/// that nothing is silently dropped.
pub trait ErrorSink {
    /// Report an error, optionally tagged with the kind of callback that
    /// raised it.
    fn report(&self, error: &(dyn std::error::Error + 'static), cause: Option<&str>);
}

/// Default sink: every error becomes a `tracing` error event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &(dyn std::error::Error + 'static), cause: Option<&str>) {
        match cause {
            Some(cause) => tracing::error!(cause, "{error}"),
            None => tracing::error!("{error}"),
        }
    }
}

/// Sink that keeps every reported error as a rendered message.
///
/// Useful in tests and in hosts that surface errors in batches.
#[derive(Default)]
pub struct RecordingErrorSink {
    entries: RefCell<Vec<ReportedError>>,
}

/// One error captured by [`RecordingErrorSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub message: String,
    pub cause: Option<String>,
}

impl fmt::Display for ReportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} ({cause})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All errors reported so far, oldest first.
    pub fn entries(&self) -> Vec<ReportedError> {
        self.entries.borrow().clone()
    }

    /// Just the messages, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, error: &(dyn std::error::Error + 'static), cause: Option<&str>) {
        self.entries.borrow_mut().push(ReportedError {
            message: error.to_string(),
            cause: cause.map(str::to_owned),
        });
    }
}

impl fmt::Debug for RecordingErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingErrorSink")
            .field("entries", &self.entries.borrow().len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
