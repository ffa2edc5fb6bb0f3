//! Append-only event logs backing the durable repository.
//!
//! A log stores registered events, assigns their ids, and answers
//! identity-agnostic reads. Authorization and submissions live above it in
//! the repository.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Event Logs                         │
//! ├──────────────────────────────────────────────────────────┤
//! │  memory   │ RwLock-guarded vector with uuid index        │
//! │  sqlite   │ SQLite tables with link/attribute indices    │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod memory;
mod sqlite;

pub use memory::InMemoryEventLog;
pub use sqlite::SqliteEventLog;

use uuid::Uuid;

use crate::error::Result;
use crate::event::ProvenanceEventRecord;
use crate::search::Query;

/// Storage backend for provenance events.
pub trait EventLog: Send + Sync {
    /// Append a batch atomically, assigning consecutive ids in batch order.
    ///
    /// Either every event is stored or none is.
    fn append(&self, events: Vec<ProvenanceEventRecord>) -> Result<Vec<ProvenanceEventRecord>>;

    /// Get an event by id.
    fn get(&self, event_id: u64) -> Result<Option<ProvenanceEventRecord>>;

    /// Get up to `max_records` events with id `>= first_id`, ascending.
    fn range(&self, first_id: u64, max_records: usize) -> Result<Vec<ProvenanceEventRecord>>;

    /// Highest assigned id, or `0` when empty.
    fn max_event_id(&self) -> u64;

    /// Every event that names `uuid` as its subject, a parent, or a child, ascending.
    fn events_for_flow_unit(&self, uuid: &Uuid) -> Result<Vec<ProvenanceEventRecord>>;

    /// Up to `limit` events with id `> after_id` that may match `query`, ascending.
    ///
    /// Backends may return extra candidates; callers re-check with
    /// [`Query::matches`].
    fn search(
        &self,
        query: &Query,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<ProvenanceEventRecord>> {
        let mut found = Vec::new();
        let mut cursor = after_id.saturating_add(1);
        loop {
            let page = self.range(cursor, limit.max(64))?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.event_id + 1;
            for event in page {
                if query.matches(&event) {
                    found.push(event);
                    if found.len() >= limit {
                        return Ok(found);
                    }
                }
            }
        }
        Ok(found)
    }
}
