//! In-memory event log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use uuid::Uuid;

use super::EventLog;
use crate::error::{ProvenanceError, Result};
use crate::event::ProvenanceEventRecord;

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<ProvenanceEventRecord>,
    index_by_uuid: HashMap<Uuid, Vec<usize>>,
}

/// Volatile event log for tests and embedded use.
///
/// Ids are contiguous from 1, so event `n` lives at index `n - 1`.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    state: RwLock<MemoryState>,
    max_event_id: AtomicU64,
}

impl InMemoryEventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.max_event_id.load(Ordering::SeqCst) as usize
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned<T>(err: std::sync::PoisonError<T>) -> ProvenanceError {
        ProvenanceError::Storage(format!("event log lock poisoned: {}", err))
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, events: Vec<ProvenanceEventRecord>) -> Result<Vec<ProvenanceEventRecord>> {
        let mut state = self.state.write().map_err(Self::poisoned)?;

        let mut stored = Vec::with_capacity(events.len());
        for mut event in events {
            let idx = state.events.len();
            event.event_id = idx as u64 + 1;

            let mut related: Vec<Uuid> = event.related_uuids().collect();
            related.sort();
            related.dedup();
            for uuid in related {
                state.index_by_uuid.entry(uuid).or_default().push(idx);
            }

            state.events.push(event.clone());
            stored.push(event);
        }

        self.max_event_id
            .store(state.events.len() as u64, Ordering::SeqCst);
        Ok(stored)
    }

    fn get(&self, event_id: u64) -> Result<Option<ProvenanceEventRecord>> {
        let Some(idx) = event_id.checked_sub(1).and_then(|i| usize::try_from(i).ok()) else {
            return Ok(None);
        };
        let state = self.state.read().map_err(Self::poisoned)?;
        Ok(state.events.get(idx).cloned())
    }

    fn range(&self, first_id: u64, max_records: usize) -> Result<Vec<ProvenanceEventRecord>> {
        let Ok(start) = usize::try_from(first_id.max(1) - 1) else {
            return Ok(Vec::new());
        };
        let state = self.state.read().map_err(Self::poisoned)?;
        Ok(state
            .events
            .iter()
            .skip(start)
            .take(max_records)
            .cloned()
            .collect())
    }

    fn max_event_id(&self) -> u64 {
        self.max_event_id.load(Ordering::SeqCst)
    }

    fn events_for_flow_unit(&self, uuid: &Uuid) -> Result<Vec<ProvenanceEventRecord>> {
        let state = self.state.read().map_err(Self::poisoned)?;
        Ok(state
            .index_by_uuid
            .get(uuid)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| state.events.get(idx))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::search::{Query, SearchableField};

    fn create_event(uuid: Uuid) -> ProvenanceEventRecord {
        ProvenanceEventRecord::new(EventType::Create, uuid, "proc-1")
    }

    #[test]
    fn test_append_assigns_sequential_ids() {
        let log = InMemoryEventLog::new();
        let stored = log
            .append(vec![create_event(Uuid::new_v4()), create_event(Uuid::new_v4())])
            .unwrap();

        assert_eq!(stored[0].event_id, 1);
        assert_eq!(stored[1].event_id, 2);
        assert_eq!(log.max_event_id(), 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_range_past_end_is_empty() {
        let log = InMemoryEventLog::new();
        for _ in 0..5 {
            log.append(vec![create_event(Uuid::new_v4())]).unwrap();
        }

        assert_eq!(log.range(4, 10).unwrap().len(), 2);
        assert_eq!(log.range(1, 3).unwrap().len(), 3);
        assert!(log.range(6, 10).unwrap().is_empty());
        assert!(log.get(6).unwrap().is_none());
        assert!(log.get(0).unwrap().is_none());
    }

    #[test]
    fn test_uuid_index_covers_links() {
        let log = InMemoryEventLog::new();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        log.append(vec![create_event(parent)]).unwrap();
        log.append(vec![ProvenanceEventRecord::new(EventType::Fork, parent, "proc-1")
            .with_parents([parent])
            .with_children([child])])
            .unwrap();
        log.append(vec![create_event(Uuid::new_v4())]).unwrap();

        assert_eq!(log.events_for_flow_unit(&parent).unwrap().len(), 2);
        assert_eq!(log.events_for_flow_unit(&child).unwrap().len(), 1);
    }

    #[test]
    fn test_default_search_scans_pages() {
        let log = InMemoryEventLog::new();
        for i in 0..200 {
            let event = create_event(Uuid::new_v4())
                .with_details(if i % 2 == 0 { "even" } else { "odd" });
            log.append(vec![event]).unwrap();
        }

        let query = Query::new().with_term(SearchableField::Details, "even");
        let found = log.search(&query, 0, 1000).unwrap();
        assert_eq!(found.len(), 100);
        assert!(found.windows(2).all(|w| w[0].event_id < w[1].event_id));

        let limited = log.search(&query, 150, 5).unwrap();
        assert_eq!(limited.len(), 5);
        assert!(limited.iter().all(|e| e.event_id > 150));
    }
}
