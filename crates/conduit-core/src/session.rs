//! Transactional process sessions
//!
//! A session owns every flow unit it leases or creates until it ends.
//! Changes and provenance events are buffered in the session and become
//! visible together on commit; rollback returns leased units to the head of
//! the input queue exactly as they were leased.
//!
//! State transitions:
//! ```text
//! Created → Active → Committed
//!              ↓
//!          RolledBack
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use conduit_provenance::{
    ContentClaim, EventType, ProvenanceError, ProvenanceEventRecord, ProvenanceRepository,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::content::ContentRepository;
use crate::context::ProcessContext;
use crate::error::SessionError;
use crate::flow_unit::FlowUnit;
use crate::queue::FlowTopology;
use crate::relationship::Relationship;

// MARK: - Session State

/// Lifecycle of a [`ProcessSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, no operation performed yet
    Created,
    /// At least one operation performed
    Active,
    /// Changes published
    Committed,
    /// Changes discarded
    RolledBack,
}

impl SessionState {
    /// Check if a state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        match (self, target) {
            (SessionState::Created, SessionState::Active) => true,
            (SessionState::Created, SessionState::RolledBack) => true,
            (SessionState::Active, SessionState::Committed) => true,
            (SessionState::Active, SessionState::RolledBack) => true,

            // Committed and RolledBack are terminal
            _ => false,
        }
    }

    /// Check if the session has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Committed | SessionState::RolledBack)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Created
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Created => write!(f, "CREATED"),
            SessionState::Active => write!(f, "ACTIVE"),
            SessionState::Committed => write!(f, "COMMITTED"),
            SessionState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

// MARK: - Unit Records

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Leased,
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Disposition {
    Transfer(String),
    Remove,
}

/// Session-side state of one flow unit.
#[derive(Debug)]
struct UnitRecord {
    origin: Origin,
    /// Version as leased from the input queue; `None` for created units.
    original: Option<FlowUnit>,
    initial_attributes: BTreeMap<String, String>,
    current: FlowUnit,
    disposition: Option<Disposition>,
}

impl UnitRecord {
    fn leased(unit: FlowUnit) -> Self {
        Self {
            origin: Origin::Leased,
            original: Some(unit.clone()),
            initial_attributes: unit.attributes().clone(),
            current: unit,
            disposition: None,
        }
    }

    fn created(unit: FlowUnit) -> Self {
        Self {
            origin: Origin::Created,
            original: None,
            initial_attributes: unit.attributes().clone(),
            current: unit,
            disposition: None,
        }
    }

    fn is_removed(&self) -> bool {
        self.disposition == Some(Disposition::Remove)
    }
}

// MARK: - Process Session

/// Transactional unit of work for one processor invocation.
///
/// Every operation takes the flow unit it acts on by reference and returns
/// the updated snapshot; the session keeps the authoritative copy.
pub struct ProcessSession {
    id: Uuid,
    component_id: String,
    component_type: String,
    config: Arc<SessionConfig>,
    topology: Arc<FlowTopology>,
    provenance: Arc<dyn ProvenanceRepository>,
    content: Arc<dyn ContentRepository>,
    state: SessionState,
    records: Vec<UnitRecord>,
    events: Vec<ProvenanceEventRecord>,
    written_claims: Vec<ContentClaim>,
}

impl ProcessSession {
    fn new(factory: &ProcessSessionFactory, context: &ProcessContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            component_id: context.component_id().to_string(),
            component_type: context.component_type().to_string(),
            config: Arc::clone(context.session_config()),
            topology: Arc::clone(&factory.topology),
            provenance: Arc::clone(&factory.provenance),
            content: Arc::clone(&factory.content),
            state: SessionState::Created,
            records: Vec::new(),
            events: Vec::new(),
            written_claims: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of staged provenance events.
    pub fn pending_event_count(&self) -> usize {
        self.events.len()
    }

    fn begin(&mut self, operation: &'static str) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::InvalidState {
                operation,
                state: self.state,
            });
        }
        self.state = SessionState::Active;
        Ok(())
    }

    /// Index of a live (not removed) record.
    fn live_index(&self, uuid: Uuid) -> Result<usize, SessionError> {
        self.records
            .iter()
            .position(|r| r.current.uuid() == uuid && !r.is_removed())
            .ok_or(SessionError::UnknownFlowUnit(uuid))
    }

    fn new_event(&self, event_type: EventType, unit: &FlowUnit) -> ProvenanceEventRecord {
        let event = ProvenanceEventRecord::new(event_type, unit.uuid(), self.component_id.clone())
            .with_component_type(self.component_type.clone())
            .with_lineage(unit.lineage_identity());
        match unit.content() {
            Some(claim) => event.with_content(*claim),
            None => event,
        }
    }

    // MARK: - Acquiring

    /// Lease the next schedulable flow unit from the input queue.
    pub fn get(&mut self) -> Result<Option<FlowUnit>, SessionError> {
        self.begin("get")?;
        let polled = self.topology.poll(Utc::now());
        Ok(polled.map(|unit| {
            self.records.push(UnitRecord::leased(unit.clone()));
            unit
        }))
    }

    /// Lease up to `max` schedulable flow units.
    pub fn get_batch(&mut self, max: usize) -> Result<Vec<FlowUnit>, SessionError> {
        self.begin("get_batch")?;
        let batch = self.topology.poll_batch(max, Utc::now());
        for unit in &batch {
            self.records.push(UnitRecord::leased(unit.clone()));
        }
        Ok(batch)
    }

    /// Create a flow unit that starts its own lineage.
    pub fn create(&mut self) -> Result<FlowUnit, SessionError> {
        self.begin("create")?;
        let unit = FlowUnit::new();
        let event = self.new_event(EventType::Create, &unit);
        self.events.push(event);
        self.records.push(UnitRecord::created(unit.clone()));
        Ok(unit)
    }

    /// Create one child of `parent`.
    pub fn create_child(&mut self, parent: &FlowUnit) -> Result<FlowUnit, SessionError> {
        let mut children = self.fork(parent, 1)?;
        children
            .pop()
            .ok_or(SessionError::UnknownFlowUnit(parent.uuid()))
    }

    /// Create `count` children of `parent`, recorded as one FORK event.
    pub fn fork(&mut self, parent: &FlowUnit, count: usize) -> Result<Vec<FlowUnit>, SessionError> {
        self.begin("fork")?;
        let idx = self.live_index(parent.uuid())?;
        let parent = self.records[idx].current.clone();
        if count == 0 {
            return Ok(Vec::new());
        }

        let children: Vec<FlowUnit> = (0..count)
            .map(|_| FlowUnit::derived(&parent, parent.lineage_identity()))
            .collect();
        let event = self
            .new_event(EventType::Fork, &parent)
            .with_parents([parent.uuid()])
            .with_children(children.iter().map(FlowUnit::uuid));
        self.events.push(event);
        for child in &children {
            self.records.push(UnitRecord::created(child.clone()));
        }
        Ok(children)
    }

    /// Copy `unit`, sharing its content claim.
    pub fn clone_unit(&mut self, unit: &FlowUnit) -> Result<FlowUnit, SessionError> {
        self.begin("clone")?;
        let idx = self.live_index(unit.uuid())?;
        let original = self.records[idx].current.clone();

        let mut copy = FlowUnit::derived(&original, original.lineage_identity());
        if let Some(claim) = original.content() {
            copy.set_content(*claim);
        }
        let event = self
            .new_event(EventType::Clone, &original)
            .with_parents([original.uuid()])
            .with_children([copy.uuid()]);
        self.events.push(event);
        self.records.push(UnitRecord::created(copy.clone()));
        Ok(copy)
    }

    /// Create one flow unit merged from `parents`.
    pub fn join(&mut self, parents: &[FlowUnit]) -> Result<FlowUnit, SessionError> {
        self.begin("join")?;
        let currents = parents
            .iter()
            .map(|p| self.live_index(p.uuid()).map(|idx| self.records[idx].current.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let child = FlowUnit::merged(&currents).ok_or_else(|| {
            ProvenanceError::InvalidEvent("JOIN requires at least one parent".to_string())
        })?;

        let event = self
            .new_event(EventType::Join, &child)
            .with_parents(currents.iter().map(FlowUnit::uuid))
            .with_children([child.uuid()]);
        self.events.push(event);
        self.records.push(UnitRecord::created(child.clone()));
        Ok(child)
    }

    // MARK: - Modifying

    /// Set one attribute. The `uuid` attribute cannot be changed.
    pub fn put_attribute(
        &mut self,
        unit: &FlowUnit,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<FlowUnit, SessionError> {
        self.put_all_attributes(unit, [(key.into(), value.into())])
    }

    /// Set several attributes at once.
    pub fn put_all_attributes<K, V>(
        &mut self,
        unit: &FlowUnit,
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> Result<FlowUnit, SessionError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.begin("put_attribute")?;
        let idx = self.live_index(unit.uuid())?;
        let record = &mut self.records[idx];
        for (key, value) in attributes {
            record.current.set_attribute(key.into(), value.into());
        }
        Ok(record.current.clone())
    }

    pub fn remove_attribute(&mut self, unit: &FlowUnit, key: &str) -> Result<FlowUnit, SessionError> {
        self.begin("remove_attribute")?;
        let idx = self.live_index(unit.uuid())?;
        let record = &mut self.records[idx];
        record.current.remove_attribute(key);
        Ok(record.current.clone())
    }

    /// Replace the payload of `unit` with `bytes` under a new claim.
    pub fn write(&mut self, unit: &FlowUnit, bytes: &[u8]) -> Result<FlowUnit, SessionError> {
        self.begin("write")?;
        let idx = self.live_index(unit.uuid())?;
        let claim = self.content.write(bytes)?;
        self.written_claims.push(claim);

        self.records[idx].current.set_content(claim);
        let updated = self.records[idx].current.clone();
        let event = self.new_event(EventType::ContentModified, &updated);
        self.events.push(event);
        Ok(updated)
    }

    /// Read the current payload of `unit`; empty without content.
    pub fn read(&mut self, unit: &FlowUnit) -> Result<Vec<u8>, SessionError> {
        self.begin("read")?;
        let idx = self.live_index(unit.uuid())?;
        match self.records[idx].current.content() {
            Some(claim) => Ok(self.content.read(claim)?),
            None => Ok(Vec::new()),
        }
    }

    /// Penalize `unit` for the configured penalty duration.
    pub fn penalize(&mut self, unit: &FlowUnit) -> Result<FlowUnit, SessionError> {
        self.begin("penalize")?;
        let idx = self.live_index(unit.uuid())?;
        let penalty = self.config.penalty_duration();
        let record = &mut self.records[idx];
        record.current.penalize(penalty);
        Ok(record.current.clone())
    }

    /// Record an event the session cannot infer, such as SEND or RECEIVE.
    pub fn report(
        &mut self,
        unit: &FlowUnit,
        event_type: EventType,
        transit_uri: Option<&str>,
        details: Option<&str>,
    ) -> Result<(), SessionError> {
        self.begin("report")?;
        if event_type.is_derivation() {
            return Err(ProvenanceError::InvalidEvent(format!(
                "{} events are recorded by session operations",
                event_type
            ))
            .into());
        }
        let idx = self.live_index(unit.uuid())?;
        let current = self.records[idx].current.clone();

        let mut event = self.new_event(event_type, &current);
        if let Some(uri) = transit_uri {
            event = event.with_transit_uri(uri);
        }
        if let Some(details) = details {
            event = event.with_details(details);
        }
        self.events.push(event);
        Ok(())
    }

    // MARK: - Dispositions

    /// Route `unit` to `relationship` on commit.
    pub fn transfer(&mut self, unit: &FlowUnit, relationship: &Relationship) -> Result<(), SessionError> {
        self.begin("transfer")?;
        let idx = self.live_index(unit.uuid())?;
        self.records[idx].disposition = Some(Disposition::Transfer(relationship.name().to_string()));
        Ok(())
    }

    /// Drop `unit`. A unit created by this session disappears without trace,
    /// which is refused while units derived from it are still live.
    pub fn remove(&mut self, unit: &FlowUnit) -> Result<(), SessionError> {
        self.begin("remove")?;
        let uuid = unit.uuid();
        let idx = self.live_index(uuid)?;

        match self.records[idx].origin {
            Origin::Leased => {
                let current = self.records[idx].current.clone();
                let event = self.new_event(EventType::Drop, &current);
                self.events.push(event);
                self.records[idx].disposition = Some(Disposition::Remove);
            }
            Origin::Created => {
                let derived_live = self
                    .events
                    .iter()
                    .filter(|event| event.parent_uuids.contains(&uuid))
                    .flat_map(|event| event.child_uuids.iter())
                    .any(|child| *child != uuid && self.live_index(*child).is_ok());
                if derived_live {
                    return Err(SessionError::DerivedFlowUnitsRemain(uuid));
                }

                self.records.remove(idx);
                self.events.retain_mut(|event| {
                    if event.flow_unit_uuid == uuid {
                        return false;
                    }
                    event.child_uuids.retain(|child| *child != uuid);
                    event.parent_uuids.retain(|parent| *parent != uuid);
                    !(event.event_type.is_derivation()
                        && (event.child_uuids.is_empty() || event.parent_uuids.is_empty()))
                });
            }
        }
        Ok(())
    }

    // MARK: - Completion

    /// Flow units with no disposition yet.
    pub fn unacknowledged_count(&self) -> usize {
        self.records.iter().filter(|r| r.disposition.is_none()).count()
    }

    /// Summary of at most `max_items` unacknowledged flow units.
    pub fn unacknowledged_summary(&self, max_items: usize) -> String {
        let pending: Vec<&FlowUnit> = self
            .records
            .iter()
            .filter(|r| r.disposition.is_none())
            .map(|r| &r.current)
            .collect();

        let listed: Vec<String> = pending.iter().take(max_items).map(|u| u.summary()).collect();
        let mut summary = format!("[{}]", listed.join(", "));
        if pending.len() > max_items {
            summary.push_str(&format!(" (+{} more)", pending.len() - max_items));
        }
        summary
    }

    /// Publish all transfers and register all staged events, or neither.
    ///
    /// On failure the session is rolled back before the error is returned.
    pub fn commit(&mut self) -> Result<(), SessionError> {
        self.begin("commit")?;

        let unacknowledged = self.unacknowledged_count();
        if unacknowledged > 0 {
            let summary =
                self.unacknowledged_summary(self.config.rollback_log_unacknowledged_max.max(1));
            self.discard(false);
            return Err(SessionError::UnacknowledgedFlowUnits {
                count: unacknowledged,
                summary,
            });
        }

        let unknown = self.records.iter().find_map(|r| match &r.disposition {
            Some(Disposition::Transfer(name)) if !self.topology.has_relationship(name) => {
                Some(name.clone())
            }
            _ => None,
        });
        if let Some(name) = unknown {
            self.discard(false);
            return Err(SessionError::UnknownRelationship(name));
        }

        let events = self.finalize_events();
        let event_count = events.len();
        let transfers: Vec<(String, FlowUnit)> = self
            .records
            .iter()
            .filter_map(|r| match &r.disposition {
                Some(Disposition::Transfer(name)) => Some((name.clone(), r.current.clone())),
                _ => None,
            })
            .collect();
        let retained: HashSet<Uuid> = transfers
            .iter()
            .filter_map(|(_, unit)| unit.content().map(|c| c.id))
            .collect();
        let transferred = transfers.len();

        let provenance = Arc::clone(&self.provenance);
        match self
            .topology
            .commit_with(transfers, move || provenance.register_events(events))
        {
            Ok(_) => {
                for claim in self.written_claims.drain(..) {
                    if !retained.contains(&claim.id) {
                        self.content.remove(&claim);
                    }
                }
                let removed = self.records.len() - transferred;
                self.records.clear();
                self.state = SessionState::Committed;
                tracing::debug!(
                    "Session {} committed: {} transferred, {} removed, {} provenance events",
                    self.id,
                    transferred,
                    removed,
                    event_count
                );
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    "Session {} failed to register {} provenance events: {}",
                    self.id,
                    event_count,
                    err
                );
                self.discard(false);
                Err(SessionError::Provenance(err))
            }
        }
    }

    /// Discard all changes and return leased units to the input queue,
    /// penalized if requested.
    pub fn rollback(&mut self, penalize: bool) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            return Err(SessionError::InvalidState {
                operation: "rollback",
                state: self.state,
            });
        }
        self.discard(penalize);
        Ok(())
    }

    fn discard(&mut self, penalize: bool) {
        let penalty = self.config.penalty_duration();
        let originals: Vec<FlowUnit> = self
            .records
            .drain(..)
            .filter_map(|record| record.original)
            .map(|mut unit| {
                if penalize {
                    unit.penalize(penalty);
                }
                unit
            })
            .collect();
        let requeued = originals.len();
        self.topology.requeue(originals);

        let discarded = self.events.len();
        self.events.clear();
        for claim in self.written_claims.drain(..) {
            self.content.remove(&claim);
        }
        self.state = SessionState::RolledBack;

        tracing::debug!(
            "Session {} rolled back: {} flow units requeued{}, {} provenance events discarded",
            self.id,
            requeued,
            if penalize { " with penalty" } else { "" },
            discarded
        );
    }

    /// Fill attribute deltas and routing into staged events, adding
    /// ATTRIBUTES_MODIFIED where nothing else records a change.
    fn finalize_events(&mut self) -> Vec<ProvenanceEventRecord> {
        let mut events = std::mem::take(&mut self.events);
        let mut appended = Vec::new();

        for record in &self.records {
            let uuid = record.current.uuid();
            let attributes = record.current.attributes();
            let relationship = match &record.disposition {
                Some(Disposition::Transfer(name)) => Some(name.as_str()),
                _ => None,
            };

            let mut has_subject_event = false;
            for event in events.iter_mut().filter(|e| e.flow_unit_uuid == uuid) {
                has_subject_event = true;
                if record.origin == Origin::Created
                    && matches!(event.event_type, EventType::Create | EventType::Join)
                {
                    event.previous_attributes.clear();
                    event.updated_attributes = attributes.clone();
                } else if &record.initial_attributes != attributes
                    && event.updated_attributes.is_empty()
                {
                    event.previous_attributes = record.initial_attributes.clone();
                    event.updated_attributes = changed_attributes(&record.initial_attributes, attributes);
                }
                if event.relationship.is_none() {
                    if let Some(name) = relationship {
                        event.relationship = Some(name.to_string());
                    }
                }
            }

            if !has_subject_event && &record.initial_attributes != attributes {
                let mut event = self
                    .new_event(EventType::AttributesModified, &record.current)
                    .with_attributes(
                        record.initial_attributes.clone(),
                        changed_attributes(&record.initial_attributes, attributes),
                    );
                if let Some(name) = relationship {
                    event = event.with_relationship(name);
                }
                appended.push(event);
            }
        }

        events.extend(appended);
        events
    }
}

/// Entries of `after` that are new or differ from `before`.
fn changed_attributes(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    after
        .iter()
        .filter(|(k, v)| before.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if !self.state.is_terminal() && !self.records.is_empty() {
            tracing::warn!(
                "Session {} dropped while {}; rolling back {} flow units",
                self.id,
                self.state,
                self.records.len()
            );
            self.discard(false);
        }
    }
}

impl std::fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSession")
            .field("id", &self.id)
            .field("component_id", &self.component_id)
            .field("state", &self.state)
            .field("flow_units", &self.records.len())
            .field("events", &self.events.len())
            .finish()
    }
}

// MARK: - Session Factory

/// Creates sessions bound to one topology and its repositories.
#[derive(Clone)]
pub struct ProcessSessionFactory {
    topology: Arc<FlowTopology>,
    provenance: Arc<dyn ProvenanceRepository>,
    content: Arc<dyn ContentRepository>,
}

impl ProcessSessionFactory {
    pub fn new(
        topology: Arc<FlowTopology>,
        provenance: Arc<dyn ProvenanceRepository>,
        content: Arc<dyn ContentRepository>,
    ) -> Self {
        Self {
            topology,
            provenance,
            content,
        }
    }

    /// Start a new session for the processor described by `context`.
    pub fn create_session(&self, context: &ProcessContext) -> ProcessSession {
        ProcessSession::new(self, context)
    }

    pub fn topology(&self) -> &Arc<FlowTopology> {
        &self.topology
    }

    pub fn provenance(&self) -> &Arc<dyn ProvenanceRepository> {
        &self.provenance
    }

    pub fn content(&self) -> &Arc<dyn ContentRepository> {
        &self.content
    }
}

impl std::fmt::Debug for ProcessSessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSessionFactory")
            .field("topology", &self.topology)
            .field("provenance_enabled", &self.provenance.is_enabled())
            .finish()
    }
}
