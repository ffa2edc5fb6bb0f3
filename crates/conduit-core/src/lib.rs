//! Conduit Core - Transactional processing of flow units
//!
//! This crate provides the execution core of a dataflow engine:
//!
//! - **FlowUnit**: Records with an identity, attributes and a content claim
//! - **Queue**: Input and per-relationship output queues with penalty-aware polling
//! - **Session**: Transactional sessions (Created→Active→Committed|RolledBack)
//! - **Transaction**: The wrapper that commits on success and rolls back on failure
//! - **Processor**: The processor contract, property descriptors and process context
//! - **Processors**: Built-in processors, currently `DebugFlow`
//! - **Content**: Boundary to the payload store
//! - **Testing**: A runner for driving processors in tests
//! - **Config**: Session and provenance configuration
//!
//! # Architecture
//!
//! ```text
//! input queue ─► ProcessSession ─► output queues
//!                     │
//!                     ▼  (on commit, under the topology lock)
//!          ProvenanceRepository (conduit-provenance)
//! ```
//!
//! A session buffers every change and provenance event. Commit publishes
//! transfers and registers events together; rollback returns leased units to
//! the head of the input queue unchanged.

pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod flow_unit;
pub mod processor;
pub mod processors;
pub mod queue;
pub mod relationship;
pub mod session;
pub mod testing;
pub mod transaction;

pub use config::{ConduitConfig, SessionConfig};
pub use content::{ContentRepository, InMemoryContentRepository};
pub use context::ProcessContext;
pub use error::{
    ConduitError, ConfigError, ContentError, ProcessError, Result, SessionError, TransactionError,
};
pub use flow_unit::{core_attributes, FlowUnit};
pub use processor::{Processor, PropertyDescriptor, PropertyKind};
pub use processors::DebugFlow;
pub use queue::{FlowQueue, FlowTopology};
pub use relationship::Relationship;
pub use session::{ProcessSession, ProcessSessionFactory, SessionState};
pub use testing::TestRunner;
pub use transaction::run_transaction;

/// Returns the version of conduit-core
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
