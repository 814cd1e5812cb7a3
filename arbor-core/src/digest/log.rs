//! Diagnostics for digests that do not settle.

use std::fmt;

use smallvec::SmallVec;

use crate::value::Value;

/// Number of trailing laps kept for the iteration-limit report.
pub(crate) const LOGGED_LAPS: usize = 5;

/// One reaction that ran during a logged lap.
#[derive(Debug, Clone)]
pub struct DirtyRecord {
    /// Label of the probe that changed.
    pub expression: String,
    pub new: Value,
    pub old: Value,
}

impl fmt::Display for DirtyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = serde_json::json!({
            "msg": self.expression,
            "newVal": self.new.to_json(),
            "oldVal": self.old.to_json(),
        });
        write!(f, "{record}")
    }
}

/// Everything that fired during one lap.
pub type LapLog = SmallVec<[DirtyRecord; 4]>;
