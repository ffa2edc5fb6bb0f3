//! Configuration for the provenance repository and its query engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProvenanceError, Result};

/// Where provenance events are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvenanceBackend {
    /// Volatile in-process log
    InMemory,
    /// SQLite database file
    Sqlite { path: PathBuf },
    /// Provenance tracking turned off; registrations are discarded
    Disabled,
}

impl Default for ProvenanceBackend {
    fn default() -> Self {
        ProvenanceBackend::InMemory
    }
}

/// Provenance repository configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    /// Storage backend
    pub backend: ProvenanceBackend,
    /// Size of the worker pool running queries and lineage computations
    pub query_threads: usize,
    /// Maximum number of nodes a lineage computation may add
    pub lineage_node_budget: usize,
    /// Upper bound on `max_results` for any one query
    pub max_query_results: usize,
    /// How long terminal submissions stay retrievable, in seconds
    pub submission_retention_secs: u64,
    /// Flow-unit attributes that may be used as search terms
    pub indexed_attributes: Vec<String>,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            backend: ProvenanceBackend::default(),
            query_threads: 2,
            lineage_node_budget: 1000,
            max_query_results: 10_000,
            submission_retention_secs: 600,
            indexed_attributes: vec![
                "filename".to_string(),
                "path".to_string(),
                "mime.type".to_string(),
            ],
        }
    }
}

impl ProvenanceConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given backend.
    pub fn with_backend(mut self, backend: ProvenanceBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Configuration for a disabled repository.
    pub fn disabled() -> Self {
        Self::default().with_backend(ProvenanceBackend::Disabled)
    }

    /// Configuration for an SQLite repository at `path`.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::default().with_backend(ProvenanceBackend::Sqlite { path: path.into() })
    }

    /// Whether provenance tracking is on.
    pub fn is_enabled(&self) -> bool {
        self.backend != ProvenanceBackend::Disabled
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| ProvenanceError::InvalidConfig(e.to_string()))
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ProvenanceError::Serialization(e.to_string()))
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| ProvenanceError::InvalidConfig(e.to_string()))
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.query_threads == 0 {
            return Err(ProvenanceError::InvalidConfig(
                "query_threads must be positive".to_string(),
            ));
        }
        if self.lineage_node_budget == 0 {
            return Err(ProvenanceError::InvalidConfig(
                "lineage_node_budget must be positive".to_string(),
            ));
        }
        if self.max_query_results == 0 {
            return Err(ProvenanceError::InvalidConfig(
                "max_query_results must be positive".to_string(),
            ));
        }
        if let ProvenanceBackend::Sqlite { path } = &self.backend {
            if path.as_os_str().is_empty() {
                return Err(ProvenanceError::InvalidConfig(
                    "sqlite backend requires a path".to_string(),
                ));
            }
        }
        if self.indexed_attributes.iter().any(|a| a.trim().is_empty()) {
            return Err(ProvenanceError::InvalidConfig(
                "indexed attribute names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
