//! The provenance repository surface and its variants.
//!
//! Callers depend on [`ProvenanceRepository`] only. [`open_repository`]
//! picks the variant from [`ProvenanceConfig::backend`]:
//!
//! - `InMemory` / `Sqlite` build a [`DurableRepository`] over the matching
//!   event log.
//! - `Disabled` builds a [`DisabledRepository`], which accepts and discards
//!   registrations and answers every read with an empty result.

use std::sync::Arc;

use crate::authorization::{AllowAll, EventAuthorizer, Identity};
use crate::config::{ProvenanceBackend, ProvenanceConfig};
use crate::engine::{LineageSubmission, QueryEngine, QuerySubmission};
use crate::error::{ProvenanceError, Result};
use crate::event::ProvenanceEventRecord;
use crate::lineage::{LineageGraph, LineageTarget};
use crate::search::{Query, QueryResult, SearchableField};
use crate::store::{EventLog, InMemoryEventLog, SqliteEventLog};
use crate::submission::{SubmissionId, SubmissionRegistry};

// MARK: - Trait

/// Durable, append-only store of provenance events with asynchronous search.
///
/// Every read is scoped to an [`Identity`]. Enumerations drop events the
/// identity may not see; point reads report them as `Unauthorized`.
pub trait ProvenanceRepository: Send + Sync {
    /// Register one event and return it with its assigned id.
    fn register_event(&self, event: ProvenanceEventRecord) -> Result<ProvenanceEventRecord> {
        self.register_events(vec![event])?
            .pop()
            .ok_or_else(|| ProvenanceError::Storage("registration returned no event".to_string()))
    }

    /// Register a batch atomically, in order.
    fn register_events(&self, events: Vec<ProvenanceEventRecord>) -> Result<Vec<ProvenanceEventRecord>>;

    /// Get one event. `Ok(None)` if it does not exist.
    fn get_event(&self, event_id: u64, identity: &Identity) -> Result<Option<ProvenanceEventRecord>>;

    /// Get up to `max_records` visible events with id `>= first_id`.
    fn get_events(
        &self,
        first_id: u64,
        max_records: usize,
        identity: &Identity,
    ) -> Result<Vec<ProvenanceEventRecord>>;

    /// Highest assigned event id, `0` when empty.
    fn max_event_id(&self) -> u64;

    /// Record fields usable as search terms.
    fn searchable_fields(&self) -> Vec<SearchableField>;

    /// Attribute names usable as search terms.
    fn searchable_attributes(&self) -> Vec<String>;

    /// Whether events are actually retained.
    fn is_enabled(&self) -> bool {
        true
    }

    // Queries

    fn submit_query(&self, query: Query, identity: &Identity) -> Result<Arc<QuerySubmission>>;

    fn retrieve_query_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<QuerySubmission>>;

    fn cancel_query_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<QuerySubmission>>;

    // Lineage

    fn submit_lineage_computation(
        &self,
        target: LineageTarget,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>>;

    /// Expand one level up from a FORK, JOIN, CLONE or REPLAY event.
    fn submit_expand_parents(&self, event_id: u64, identity: &Identity) -> Result<Arc<LineageSubmission>>;

    /// Expand one level down from a FORK, JOIN, CLONE or REPLAY event.
    fn submit_expand_children(&self, event_id: u64, identity: &Identity) -> Result<Arc<LineageSubmission>>;

    fn retrieve_lineage_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>>;

    fn cancel_lineage_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>>;

    /// Drop terminal submissions past their retention window.
    fn purge_expired_submissions(&self) -> Result<usize>;
}

/// Build the repository variant named by `config.backend`.
pub fn open_repository(
    config: &ProvenanceConfig,
    authorizer: Arc<dyn EventAuthorizer>,
) -> Result<Arc<dyn ProvenanceRepository>> {
    config.validate()?;

    let repository: Arc<dyn ProvenanceRepository> = match &config.backend {
        ProvenanceBackend::InMemory => {
            tracing::info!("Opening in-memory provenance repository");
            Arc::new(DurableRepository::new(
                Arc::new(InMemoryEventLog::new()),
                authorizer,
                config.clone(),
            )?)
        }
        ProvenanceBackend::Sqlite { path } => {
            tracing::info!("Opening SQLite provenance repository at {}", path.display());
            Arc::new(DurableRepository::new(
                Arc::new(SqliteEventLog::open(path)?),
                authorizer,
                config.clone(),
            )?)
        }
        ProvenanceBackend::Disabled => {
            tracing::info!("Provenance tracking disabled; events will be discarded");
            Arc::new(DisabledRepository::new())
        }
    };
    Ok(repository)
}

// MARK: - Durable Repository

/// Repository over an [`EventLog`] with a [`QueryEngine`] for submissions.
pub struct DurableRepository {
    log: Arc<dyn EventLog>,
    authorizer: Arc<dyn EventAuthorizer>,
    engine: QueryEngine,
    config: ProvenanceConfig,
}

impl DurableRepository {
    /// Create a repository over `log`.
    pub fn new(
        log: Arc<dyn EventLog>,
        authorizer: Arc<dyn EventAuthorizer>,
        config: ProvenanceConfig,
    ) -> Result<Self> {
        let engine = QueryEngine::new(Arc::clone(&log), Arc::clone(&authorizer), &config)?;
        Ok(Self {
            log,
            authorizer,
            engine,
            config,
        })
    }

    /// In-memory repository that lets every identity see everything.
    pub fn in_memory() -> Result<Self> {
        Self::new(
            Arc::new(InMemoryEventLog::new()),
            Arc::new(AllowAll),
            ProvenanceConfig::default(),
        )
    }

    pub fn config(&self) -> &ProvenanceConfig {
        &self.config
    }

    /// A derivation event the identity may see, for expansion.
    fn derivation_event(&self, event_id: u64, identity: &Identity) -> Result<ProvenanceEventRecord> {
        let event = self
            .get_event(event_id, identity)?
            .ok_or_else(|| ProvenanceError::NotFound(format!("event {}", event_id)))?;

        if !event.event_type.is_derivation() {
            return Err(ProvenanceError::InvalidRequest(format!(
                "event {} is a {} event; expansion requires FORK, JOIN, CLONE or REPLAY",
                event_id, event.event_type
            )));
        }
        Ok(event)
    }
}

impl ProvenanceRepository for DurableRepository {
    fn register_events(&self, events: Vec<ProvenanceEventRecord>) -> Result<Vec<ProvenanceEventRecord>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        for event in &events {
            event.validate()?;
        }

        let stored = self.log.append(events)?;
        if let (Some(first), Some(last)) = (stored.first(), stored.last()) {
            tracing::debug!(
                "Registered {} provenance events ({}..={})",
                stored.len(),
                first.event_id,
                last.event_id
            );
        }
        Ok(stored)
    }

    fn get_event(&self, event_id: u64, identity: &Identity) -> Result<Option<ProvenanceEventRecord>> {
        match self.log.get(event_id)? {
            Some(event) if !self.authorizer.is_authorized(identity, &event) => Err(
                ProvenanceError::unauthorized(identity.name(), format!("event {}", event_id)),
            ),
            other => Ok(other),
        }
    }

    fn get_events(
        &self,
        first_id: u64,
        max_records: usize,
        identity: &Identity,
    ) -> Result<Vec<ProvenanceEventRecord>> {
        Ok(self
            .log
            .range(first_id, max_records)?
            .into_iter()
            .filter(|event| self.authorizer.is_authorized(identity, event))
            .collect())
    }

    fn max_event_id(&self) -> u64 {
        self.log.max_event_id()
    }

    fn searchable_fields(&self) -> Vec<SearchableField> {
        SearchableField::standard()
    }

    fn searchable_attributes(&self) -> Vec<String> {
        self.config.indexed_attributes.clone()
    }

    fn submit_query(&self, query: Query, identity: &Identity) -> Result<Arc<QuerySubmission>> {
        query.validate(&self.searchable_fields(), &self.config.indexed_attributes)?;
        self.engine.submit_query(query, identity)
    }

    fn retrieve_query_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<QuerySubmission>> {
        self.engine.retrieve_query(id, identity)
    }

    fn cancel_query_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<QuerySubmission>> {
        self.engine.cancel_query(id, identity)
    }

    fn submit_lineage_computation(
        &self,
        target: LineageTarget,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        let flow_unit = match target {
            LineageTarget::FlowUnit(uuid) => uuid,
            LineageTarget::Event(event_id) => {
                self.get_event(event_id, identity)?
                    .ok_or_else(|| ProvenanceError::NotFound(format!("event {}", event_id)))?
                    .flow_unit_uuid
            }
        };
        self.engine.submit_lineage(flow_unit, identity)
    }

    fn submit_expand_parents(&self, event_id: u64, identity: &Identity) -> Result<Arc<LineageSubmission>> {
        let event = self.derivation_event(event_id, identity)?;
        self.engine.submit_expansion(event.parent_uuids, identity)
    }

    fn submit_expand_children(&self, event_id: u64, identity: &Identity) -> Result<Arc<LineageSubmission>> {
        let event = self.derivation_event(event_id, identity)?;
        self.engine.submit_expansion(event.child_uuids, identity)
    }

    fn retrieve_lineage_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        self.engine.retrieve_lineage(id, identity)
    }

    fn cancel_lineage_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        self.engine.cancel_lineage(id, identity)
    }

    fn purge_expired_submissions(&self) -> Result<usize> {
        self.engine.purge_expired()
    }
}

// MARK: - Disabled Repository

/// Repository used when provenance tracking is off.
///
/// Registrations succeed and are dropped; submissions complete immediately
/// with empty results. Submission ownership is still enforced.
pub struct DisabledRepository {
    queries: SubmissionRegistry<QueryResult>,
    lineages: SubmissionRegistry<LineageGraph>,
}

impl DisabledRepository {
    pub fn new() -> Self {
        Self {
            queries: SubmissionRegistry::new("query"),
            lineages: SubmissionRegistry::new("lineage"),
        }
    }

    fn empty_lineage(&self, identity: &Identity) -> Result<Arc<LineageSubmission>> {
        let submission = self.lineages.create(identity.clone())?;
        submission.start();
        submission.complete(LineageGraph::default());
        Ok(submission)
    }
}

impl Default for DisabledRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvenanceRepository for DisabledRepository {
    fn register_events(&self, events: Vec<ProvenanceEventRecord>) -> Result<Vec<ProvenanceEventRecord>> {
        // Ids stay 0: nothing was stored.
        Ok(events)
    }

    fn get_event(&self, _event_id: u64, _identity: &Identity) -> Result<Option<ProvenanceEventRecord>> {
        Ok(None)
    }

    fn get_events(
        &self,
        _first_id: u64,
        _max_records: usize,
        _identity: &Identity,
    ) -> Result<Vec<ProvenanceEventRecord>> {
        Ok(Vec::new())
    }

    fn max_event_id(&self) -> u64 {
        0
    }

    fn searchable_fields(&self) -> Vec<SearchableField> {
        Vec::new()
    }

    fn searchable_attributes(&self) -> Vec<String> {
        Vec::new()
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn submit_query(&self, _query: Query, identity: &Identity) -> Result<Arc<QuerySubmission>> {
        let submission = self.queries.create(identity.clone())?;
        submission.start();
        submission.complete(QueryResult::default());
        Ok(submission)
    }

    fn retrieve_query_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<QuerySubmission>> {
        self.queries.retrieve(id, identity)
    }

    fn cancel_query_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<QuerySubmission>> {
        self.queries.cancel(id, identity)
    }

    fn submit_lineage_computation(
        &self,
        _target: LineageTarget,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        self.empty_lineage(identity)
    }

    fn submit_expand_parents(&self, _event_id: u64, identity: &Identity) -> Result<Arc<LineageSubmission>> {
        self.empty_lineage(identity)
    }

    fn submit_expand_children(&self, _event_id: u64, identity: &Identity) -> Result<Arc<LineageSubmission>> {
        self.empty_lineage(identity)
    }

    fn retrieve_lineage_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        self.lineages.retrieve(id, identity)
    }

    fn cancel_lineage_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        self.lineages.cancel(id, identity)
    }

    fn purge_expired_submissions(&self) -> Result<usize> {
        // Submissions complete on creation; keep them only briefly.
        let retention = chrono::Duration::seconds(60);
        Ok(self.queries.purge_expired(retention)? + self.lineages.purge_expired(retention)?)
    }
}
