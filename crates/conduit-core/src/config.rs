//! Configuration for conduit-core
//!
//! Built once at startup and shared by `Arc`; nothing in the session path
//! mutates it.

use std::path::Path;
use std::time::Duration;

use conduit_provenance::ProvenanceConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitConfig {
    /// Session and rollback behavior
    pub session: SessionConfig,
    /// Provenance repository settings
    pub provenance: ProvenanceConfig,
}

/// Session behavior configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Log a summary of unacknowledged flow units when rolling back after a failure
    pub rollback_log_unacknowledged: bool,
    /// Maximum number of flow units named in that summary
    pub rollback_log_unacknowledged_max: usize,
    /// How long a penalized flow unit stays unschedulable, in milliseconds
    pub penalty_duration_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rollback_log_unacknowledged: false,
            rollback_log_unacknowledged_max: 5,
            penalty_duration_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// Penalty as a duration
    pub fn penalty_duration(&self) -> Duration {
        Duration::from_millis(self.penalty_duration_ms)
    }

    /// Enable unacknowledged-flow-unit diagnostics, naming at most `max` units.
    pub fn with_unacknowledged_logging(mut self, max: usize) -> Self {
        self.rollback_log_unacknowledged = true;
        self.rollback_log_unacknowledged_max = max;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rollback_log_unacknowledged && self.rollback_log_unacknowledged_max == 0 {
            return Err(ConfigError::OutOfRange(
                "rollback_log_unacknowledged_max must be positive when logging is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl ConduitConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.provenance.validate()?;
        Ok(())
    }
}
