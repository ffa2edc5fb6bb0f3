//! Asynchronous query and lineage engine.
//!
//! Submissions are registered, handed to a bounded rayon pool and returned
//! to the caller immediately. Workers never hold the event log's append
//! path for longer than one page read.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use uuid::Uuid;

use crate::authorization::{EventAuthorizer, Identity};
use crate::config::ProvenanceConfig;
use crate::error::{ProvenanceError, Result};
use crate::lineage::{LineageBuilder, LineageGraph};
use crate::search::{Query, QueryResult};
use crate::store::EventLog;
use crate::submission::{Submission, SubmissionId, SubmissionRegistry};

/// Handle for an asynchronous query.
pub type QuerySubmission = Submission<QueryResult>;

/// Handle for an asynchronous lineage computation or expansion.
pub type LineageSubmission = Submission<LineageGraph>;

/// Events read per page while scanning for query matches.
const QUERY_PAGE_SIZE: usize = 256;

/// Largest retention chrono can represent.
const MAX_RETENTION_SECS: u64 = (i64::MAX / 1000) as u64;

/// Runs queries and lineage computations against an event log.
pub struct QueryEngine {
    pool: rayon::ThreadPool,
    log: Arc<dyn EventLog>,
    authorizer: Arc<dyn EventAuthorizer>,
    queries: SubmissionRegistry<QueryResult>,
    lineages: SubmissionRegistry<LineageGraph>,
    node_budget: usize,
    max_query_results: usize,
    retention: chrono::Duration,
}

impl QueryEngine {
    /// Create an engine with `config.query_threads` workers.
    pub fn new(
        log: Arc<dyn EventLog>,
        authorizer: Arc<dyn EventAuthorizer>,
        config: &ProvenanceConfig,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.query_threads)
            .thread_name(|i| format!("provenance-query-{}", i))
            .build()
            .map_err(|e| ProvenanceError::InvalidConfig(format!("query pool: {}", e)))?;

        Ok(Self {
            pool,
            log,
            authorizer,
            queries: SubmissionRegistry::new("query"),
            lineages: SubmissionRegistry::new("lineage"),
            node_budget: config.lineage_node_budget,
            max_query_results: config.max_query_results,
            retention: chrono::Duration::seconds(
                config.submission_retention_secs.min(MAX_RETENTION_SECS) as i64,
            ),
        })
    }

    // MARK: - Queries

    /// Queue `query` and return its pending handle.
    ///
    /// The scan covers events registered before this call returns.
    pub fn submit_query(&self, query: Query, identity: &Identity) -> Result<Arc<QuerySubmission>> {
        self.purge_expired()?;

        let submission = self.queries.create(identity.clone())?;
        let upper_bound = self.log.max_event_id();
        let max_results = query.max_results.min(self.max_query_results);
        tracing::debug!(
            "Submitted query {} for {} over events up to {}",
            submission.id(),
            identity,
            upper_bound
        );

        let handle = Arc::clone(&submission);
        let log = Arc::clone(&self.log);
        let authorizer = Arc::clone(&self.authorizer);
        self.pool.spawn(move || {
            execute(&handle, |is_canceled| {
                run_query(
                    log.as_ref(),
                    authorizer.as_ref(),
                    &handle,
                    &query,
                    max_results,
                    upper_bound,
                    is_canceled,
                )
            })
        });

        Ok(submission)
    }

    /// Poll a query submission.
    pub fn retrieve_query(&self, id: SubmissionId, identity: &Identity) -> Result<Arc<QuerySubmission>> {
        self.queries.retrieve(id, identity)
    }

    /// Cancel a query submission.
    pub fn cancel_query(&self, id: SubmissionId, identity: &Identity) -> Result<Arc<QuerySubmission>> {
        self.queries.cancel(id, identity)
    }

    // MARK: - Lineage

    /// Queue a full lineage computation starting at `flow_unit`.
    pub fn submit_lineage(&self, flow_unit: Uuid, identity: &Identity) -> Result<Arc<LineageSubmission>> {
        self.spawn_lineage(identity, move |builder, is_canceled| {
            builder.compute(flow_unit, is_canceled)
        })
    }

    /// Queue a one-level expansion over `flow_units`.
    pub fn submit_expansion(
        &self,
        flow_units: Vec<Uuid>,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        self.spawn_lineage(identity, move |builder, is_canceled| {
            builder.expand(&flow_units, is_canceled)
        })
    }

    fn spawn_lineage<F>(&self, identity: &Identity, work: F) -> Result<Arc<LineageSubmission>>
    where
        F: FnOnce(&LineageBuilder<'_>, &dyn Fn() -> bool) -> Result<LineageGraph> + Send + 'static,
    {
        self.purge_expired()?;

        let submission = self.lineages.create(identity.clone())?;
        tracing::debug!("Submitted lineage computation {} for {}", submission.id(), identity);

        let handle = Arc::clone(&submission);
        let log = Arc::clone(&self.log);
        let authorizer = Arc::clone(&self.authorizer);
        let node_budget = self.node_budget;
        self.pool.spawn(move || {
            execute(&handle, |is_canceled| {
                let builder = LineageBuilder {
                    log: log.as_ref(),
                    authorizer: authorizer.as_ref(),
                    identity: handle.submitter(),
                    node_budget,
                };
                work(&builder, is_canceled)
            })
        });

        Ok(submission)
    }

    /// Poll a lineage submission.
    pub fn retrieve_lineage(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        self.lineages.retrieve(id, identity)
    }

    /// Cancel a lineage submission.
    pub fn cancel_lineage(&self, id: SubmissionId, identity: &Identity) -> Result<Arc<LineageSubmission>> {
        self.lineages.cancel(id, identity)
    }

    // MARK: - Retention

    /// Drop terminal submissions older than the retention window.
    pub fn purge_expired(&self) -> Result<usize> {
        let purged = self.queries.purge_expired(self.retention)?
            + self.lineages.purge_expired(self.retention)?;
        if purged > 0 {
            tracing::debug!("Purged {} expired provenance submissions", purged);
        }
        Ok(purged)
    }
}

/// Run one submission's work on the current worker thread.
fn execute<R, F>(submission: &Submission<R>, work: F)
where
    F: FnOnce(&dyn Fn() -> bool) -> Result<R>,
{
    if !submission.start() {
        // Canceled before a worker picked it up.
        return;
    }

    let is_canceled = || submission.is_canceled();
    match panic::catch_unwind(AssertUnwindSafe(|| work(&is_canceled))) {
        Ok(Ok(result)) => {
            if !submission.complete(result) {
                tracing::debug!("Discarded result of canceled submission {}", submission.id());
            }
        }
        Ok(Err(err)) => {
            if !submission.is_canceled() {
                tracing::warn!("Provenance submission {} failed: {}", submission.id(), err);
            }
            submission.fail(err.to_string());
        }
        Err(_) => {
            tracing::error!("Provenance submission {} panicked", submission.id());
            submission.fail("worker panicked");
        }
    }
}

fn run_query(
    log: &dyn EventLog,
    authorizer: &dyn EventAuthorizer,
    submission: &QuerySubmission,
    query: &Query,
    max_results: usize,
    upper_bound: u64,
    is_canceled: &dyn Fn() -> bool,
) -> Result<QueryResult> {
    let mut result = QueryResult::default();
    let mut cursor = query.min_event_id.unwrap_or(1).saturating_sub(1);

    while cursor < upper_bound {
        if is_canceled() {
            return Err(ProvenanceError::InvalidRequest("query canceled".to_string()));
        }

        let page = log.search(query, cursor, QUERY_PAGE_SIZE)?;
        let Some(last) = page.last().map(|e| e.event_id) else {
            break;
        };

        for event in page {
            if event.event_id > upper_bound {
                break;
            }
            if !query.matches(&event) || !authorizer.is_authorized(submission.submitter(), &event) {
                continue;
            }
            result.total_hit_count += 1;
            if result.events.len() < max_results {
                result.events.push(event);
            }
        }

        cursor = last;
        submission.set_progress(((cursor.min(upper_bound) * 100) / upper_bound.max(1)) as u8);
    }

    Ok(result)
}
