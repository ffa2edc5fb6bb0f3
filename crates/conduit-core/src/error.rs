//! Error types for conduit-core

use conduit_provenance::ProvenanceError;
use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionState;

/// Result type alias for conduit operations
pub type Result<T> = std::result::Result<T, ConduitError>;

/// Main error type for conduit operations
#[derive(Error, Debug)]
pub enum ConduitError {
    /// Session-related errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Errors raised by processor logic
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Errors from a transactional invocation
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Provenance repository errors
    #[error("Provenance error: {0}")]
    Provenance(#[from] ProvenanceError),

    /// Content repository errors
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Session-specific errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Operation attempted on a session that has already ended
    #[error("Cannot {operation} a session in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Flow unit not known to this session (never leased, or removed)
    #[error("Flow unit {0} is not owned by this session")]
    UnknownFlowUnit(Uuid),

    /// A created flow unit cannot vanish while its derivatives remain
    #[error("Flow unit {0} cannot be removed while flow units derived from it remain")]
    DerivedFlowUnitsRemain(Uuid),

    /// Transfer to a relationship the topology does not define
    #[error("Unknown relationship: {0}")]
    UnknownRelationship(String),

    /// Commit attempted while some flow units have no disposition
    #[error("{count} flow unit(s) were neither transferred nor removed: {summary}")]
    UnacknowledgedFlowUnits { count: usize, summary: String },

    /// Reading or writing content failed
    #[error("Content error: {0}")]
    Content(#[from] ContentError),

    /// The provenance repository rejected the session's events
    #[error("Provenance error: {0}")]
    Provenance(#[from] ProvenanceError),
}

/// Errors returned by processor logic
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Processor-reported failure
    #[error("{0}")]
    Failure(String),

    /// A session call failed
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// A provenance call failed
    #[error("Provenance error: {0}")]
    Provenance(#[from] ProvenanceError),

    /// A property value was missing or malformed
    #[error("Invalid property '{name}': {reason}")]
    InvalidProperty { name: String, reason: String },

    /// Processor logic panicked
    #[error("Processor panicked: {0}")]
    Panicked(String),
}

impl ProcessError {
    /// Build a processor failure from any message
    pub fn failure(message: impl Into<String>) -> Self {
        ProcessError::Failure(message.into())
    }

    /// Build an invalid-property error
    pub fn invalid_property(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ProcessError::InvalidProperty {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a failed transactional invocation
#[derive(Error, Debug)]
pub enum TransactionError {
    /// Processor logic failed; the session was rolled back
    #[error("Processing failed: {0}")]
    Processing(#[source] ProcessError),

    /// Commit failed; the session was rolled back
    #[error("Commit failed: {0}")]
    Commit(#[source] SessionError),
}

impl TransactionError {
    /// The processor error, if processing failed
    pub fn process_error(&self) -> Option<&ProcessError> {
        match self {
            TransactionError::Processing(err) => Some(err),
            TransactionError::Commit(_) => None,
        }
    }
}

/// Content repository errors
#[derive(Error, Debug)]
pub enum ContentError {
    /// Claim not present in the repository
    #[error("Content claim not found: {0}")]
    NotFound(Uuid),

    /// The backing store failed
    #[error("Content storage error: {0}")]
    Storage(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A value is out of its allowed range
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// The configuration text could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// The configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Provenance section rejected
    #[error("Provenance configuration: {0}")]
    Provenance(#[from] ProvenanceError),
}
