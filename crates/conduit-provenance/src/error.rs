//! Error types for conduit-provenance

use thiserror::Error;

/// Result type alias for provenance operations
pub type Result<T> = std::result::Result<T, ProvenanceError>;

/// Errors raised by the provenance repository and its query engine
#[derive(Error, Debug)]
pub enum ProvenanceError {
    /// The requested event or submission does not exist (or has expired)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller may not see the requested resource
    #[error("Identity '{identity}' is not authorized to access {resource}")]
    Unauthorized { identity: String, resource: String },

    /// An event failed validation before registration
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// A request was malformed (bad query, wrong event type for expansion)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A lineage traversal found a cycle in the stored links
    #[error("Corrupt lineage: {0}")]
    CorruptLineage(String),

    /// The backing store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// A record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration values were rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProvenanceError {
    /// Build an authorization error for `identity` on `resource`
    pub fn unauthorized(identity: impl Into<String>, resource: impl Into<String>) -> Self {
        ProvenanceError::Unauthorized {
            identity: identity.into(),
            resource: resource.into(),
        }
    }

    /// Whether this error means "you may not see this"
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ProvenanceError::Unauthorized { .. })
    }

    /// Whether this error means "this does not exist"
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProvenanceError::NotFound(_))
    }
}

impl From<rusqlite::Error> for ProvenanceError {
    fn from(err: rusqlite::Error) -> Self {
        ProvenanceError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ProvenanceError {
    fn from(err: serde_json::Error) -> Self {
        ProvenanceError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ProvenanceError {
    fn from(err: std::io::Error) -> Self {
        ProvenanceError::Storage(err.to_string())
    }
}
