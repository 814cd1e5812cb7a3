//! Tree Configuration
//!
//! Settings that apply to a whole scope tree. They are fixed when the root
//! is built and shared by every scope created under it.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScopeError};

/// Default number of extra laps a digest may run before giving up.
pub const DEFAULT_TTL: usize = 10;

fn default_ttl() -> usize {
    DEFAULT_TTL
}

/// Configuration for a scope tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    /// Maximum number of re-check laps a single digest may run after the
    /// first one. When the tree is still dirty after that many laps the
    /// digest aborts with [`ScopeError::IterationLimit`].
    #[serde(default = "default_ttl")]
    pub ttl: usize,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

impl RootConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)
            .map_err(|e| ScopeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can drive a digest.
    pub fn validate(&self) -> Result<()> {
        if self.ttl == 0 {
            return Err(ScopeError::InvalidConfig(
                "ttl must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
