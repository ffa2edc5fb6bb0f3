//! Queues around a single processor.
//!
//! ```text
//!              ┌───────────┐   success  ┌───────┐
//!  input ────► │ processor │ ─────────► │ queue │
//!  queue       └───────────┘   failure  ├───────┤
//!                           ─────────►  │ queue │
//!                                       └───────┘
//! ```
//!
//! All queues of a topology sit behind one lock, so a commit's transfers
//! land together.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::flow_unit::FlowUnit;
use crate::relationship::Relationship;

// MARK: - Flow Queue

/// FIFO of flow units that skips penalized entries when polling.
#[derive(Debug, Clone, Default)]
pub struct FlowQueue {
    items: VecDeque<FlowUnit>,
}

impl FlowQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail.
    pub fn push(&mut self, unit: FlowUnit) {
        self.items.push_back(unit);
    }

    /// Take the first unit not penalized at `now`.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<FlowUnit> {
        let idx = self.items.iter().position(|u| !u.is_penalized(now))?;
        self.items.remove(idx)
    }

    /// Take up to `max` units not penalized at `now`, in queue order.
    pub fn poll_batch(&mut self, max: usize, now: DateTime<Utc>) -> Vec<FlowUnit> {
        let mut batch = Vec::new();
        let mut kept = VecDeque::with_capacity(self.items.len());
        while let Some(unit) = self.items.pop_front() {
            if batch.len() < max && !unit.is_penalized(now) {
                batch.push(unit);
            } else {
                kept.push_back(unit);
            }
        }
        self.items = kept;
        batch
    }

    /// Put units back at the head, keeping their relative order.
    pub fn requeue_front(&mut self, units: Vec<FlowUnit>) {
        for unit in units.into_iter().rev() {
            self.items.push_front(unit);
        }
    }

    /// Head of the queue, penalized or not.
    pub fn peek(&self) -> Option<&FlowUnit> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowUnit> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove and return everything.
    pub fn drain(&mut self) -> Vec<FlowUnit> {
        self.items.drain(..).collect()
    }
}

// MARK: - Topology

#[derive(Debug, Default)]
struct TopologyState {
    input: FlowQueue,
    outputs: HashMap<String, FlowQueue>,
}

/// The input queue of one processor and one output queue per relationship.
#[derive(Debug)]
pub struct FlowTopology {
    relationships: Vec<Relationship>,
    state: Mutex<TopologyState>,
}

impl FlowTopology {
    /// Create a topology with an output queue for each relationship.
    pub fn new(relationships: impl IntoIterator<Item = Relationship>) -> Self {
        let relationships: Vec<Relationship> = relationships.into_iter().collect();
        let outputs = relationships
            .iter()
            .map(|r| (r.name().to_string(), FlowQueue::new()))
            .collect();

        Self {
            relationships,
            state: Mutex::new(TopologyState {
                input: FlowQueue::new(),
                outputs,
            }),
        }
    }

    // Queue operations never leave state half-updated, so a poisoned lock is
    // still safe to use.
    fn lock(&self) -> MutexGuard<'_, TopologyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn has_relationship(&self, name: &str) -> bool {
        self.relationships.iter().any(|r| r.name() == name)
    }

    /// Add a unit to the input queue.
    pub fn enqueue(&self, unit: FlowUnit) {
        self.lock().input.push(unit);
    }

    pub fn poll(&self, now: DateTime<Utc>) -> Option<FlowUnit> {
        self.lock().input.poll(now)
    }

    pub fn poll_batch(&self, max: usize, now: DateTime<Utc>) -> Vec<FlowUnit> {
        self.lock().input.poll_batch(max, now)
    }

    /// Return units to the head of the input queue, in order.
    pub fn requeue(&self, units: Vec<FlowUnit>) {
        if units.is_empty() {
            return;
        }
        self.lock().input.requeue_front(units);
    }

    /// Units waiting in the input queue, penalized ones included.
    pub fn queue_size(&self) -> usize {
        self.lock().input.len()
    }

    /// Copy of the input queue's head.
    pub fn peek_input(&self) -> Option<FlowUnit> {
        self.lock().input.peek().cloned()
    }

    /// Copy of the units delivered to `relationship`.
    pub fn output(&self, relationship: &str) -> Vec<FlowUnit> {
        self.lock()
            .outputs
            .get(relationship)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn output_count(&self, relationship: &str) -> usize {
        self.lock()
            .outputs
            .get(relationship)
            .map(FlowQueue::len)
            .unwrap_or(0)
    }

    /// Remove and return the units delivered to `relationship`.
    pub fn drain_output(&self, relationship: &str) -> Vec<FlowUnit> {
        self.lock()
            .outputs
            .get_mut(relationship)
            .map(FlowQueue::drain)
            .unwrap_or_default()
    }

    /// Run `register` and, if it succeeds, deliver `transfers`, all under the
    /// topology lock.
    pub(crate) fn commit_with<T, E>(
        &self,
        transfers: Vec<(String, FlowUnit)>,
        register: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut state = self.lock();
        let value = register()?;
        for (relationship, unit) in transfers {
            state.outputs.entry(relationship).or_default().push(unit);
        }
        Ok(value)
    }
}
