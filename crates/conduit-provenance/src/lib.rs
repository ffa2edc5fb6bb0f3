//! conduit-provenance: append-only provenance events and lineage queries
//!
//! Every state transition a flow unit undergoes is recorded as a
//! [`ProvenanceEventRecord`]. The repository assigns strictly increasing event
//! ids, answers identity-scoped reads, and runs searches and lineage
//! computations asynchronously on a bounded worker pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    conduit-provenance                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  event         │ Event records and event types              │
//! │  search        │ Searchable fields, queries, results        │
//! │  authorization │ Identities and event-level access          │
//! │  store         │ In-memory and SQLite event logs            │
//! │  submission    │ Pollable async handles and their registry  │
//! │  lineage       │ Lineage graphs and traversal               │
//! │  engine        │ Worker pool running submissions            │
//! │  repository    │ Durable and disabled repository variants   │
//! │  config        │ Backend selection and limits               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_provenance::{open_repository, AllowAll, EventType, Identity,
//!     ProvenanceConfig, ProvenanceEventRecord, Query};
//!
//! let repo = open_repository(&ProvenanceConfig::default(), Arc::new(AllowAll))?;
//! repo.register_event(ProvenanceEventRecord::new(EventType::Create, uuid, "GenerateFlowUnit-1"))?;
//!
//! let submission = repo.submit_query(Query::new(), &Identity::new("operator"))?;
//! // poll repo.retrieve_query_submission(submission.id(), ...) until complete
//! ```

pub mod authorization;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod lineage;
pub mod repository;
pub mod search;
pub mod store;
pub mod submission;

pub use authorization::{AllowAll, ComponentAccessPolicy, EventAuthorizer, Identity};
pub use config::{ProvenanceBackend, ProvenanceConfig};
pub use engine::{LineageSubmission, QueryEngine, QuerySubmission};
pub use error::{ProvenanceError, Result};
pub use event::{ContentClaim, EventType, ProvenanceEventRecord};
pub use lineage::{LineageEdge, LineageGraph, LineageNode, LineageNodeId, LineageTarget};
pub use repository::{open_repository, DisabledRepository, DurableRepository, ProvenanceRepository};
pub use search::{Query, QueryResult, SearchTerm, SearchableField};
pub use store::{EventLog, InMemoryEventLog, SqliteEventLog};
pub use submission::{Submission, SubmissionId, SubmissionStatus};
