//! Lineage graphs and the traversal that builds them.
//!
//! A lineage graph has two kinds of nodes: one per flow unit and one per
//! event. Each flow unit's events form a chain starting at its flow-unit
//! node. A derivation event (FORK, JOIN, CLONE, REPLAY) continues the chain
//! of every parent it names and points at the flow-unit node of every child.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authorization::{EventAuthorizer, Identity};
use crate::error::{ProvenanceError, Result};
use crate::event::{EventType, ProvenanceEventRecord};
use crate::store::EventLog;

// MARK: - Graph Types

/// What a lineage computation starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineageTarget {
    /// The flow unit an event is about
    Event(u64),
    /// A flow unit directly
    FlowUnit(Uuid),
}

impl From<Uuid> for LineageTarget {
    fn from(uuid: Uuid) -> Self {
        LineageTarget::FlowUnit(uuid)
    }
}

impl From<u64> for LineageTarget {
    fn from(event_id: u64) -> Self {
        LineageTarget::Event(event_id)
    }
}

/// Identity of a node in a lineage graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LineageNodeId {
    FlowUnit(Uuid),
    Event(u64),
}

/// A node of a lineage graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageNode {
    pub id: LineageNodeId,
    /// Flow unit the node belongs to
    pub flow_unit_uuid: Uuid,
    /// Event details; `None` for flow-unit nodes and redacted events
    pub event_type: Option<EventType>,
    pub lineage_identity: Option<Uuid>,
    pub component_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// The caller may not see this event; only its position is kept
    pub redacted: bool,
}

impl LineageNode {
    fn flow_unit(uuid: Uuid) -> Self {
        Self {
            id: LineageNodeId::FlowUnit(uuid),
            flow_unit_uuid: uuid,
            event_type: None,
            lineage_identity: None,
            component_id: None,
            timestamp: None,
            redacted: false,
        }
    }

    fn event(record: &ProvenanceEventRecord, visible: bool) -> Self {
        if !visible {
            return Self {
                id: LineageNodeId::Event(record.event_id),
                flow_unit_uuid: record.flow_unit_uuid,
                event_type: None,
                lineage_identity: None,
                component_id: None,
                timestamp: None,
                redacted: true,
            };
        }
        Self {
            id: LineageNodeId::Event(record.event_id),
            flow_unit_uuid: record.flow_unit_uuid,
            event_type: Some(record.event_type),
            lineage_identity: Some(record.lineage_identity),
            component_id: Some(record.component_id.clone()),
            timestamp: Some(record.timestamp),
            redacted: false,
        }
    }
}

/// A parent → child edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineageEdge {
    pub source: LineageNodeId,
    pub target: LineageNodeId,
    /// Flow unit whose history the edge follows
    pub flow_unit_uuid: Uuid,
}

/// Result of a lineage computation or expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageGraph {
    pub nodes: Vec<LineageNode>,
    pub edges: Vec<LineageEdge>,
    /// The node budget stopped the traversal early
    pub truncated: bool,
}

impl LineageGraph {
    /// Look up a node.
    pub fn node(&self, id: LineageNodeId) -> Option<&LineageNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: LineageNodeId) -> bool {
        self.node(id).is_some()
    }

    /// Ids of event nodes, ascending.
    pub fn event_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .nodes
            .iter()
            .filter_map(|n| match n.id {
                LineageNodeId::Event(id) => Some(id),
                LineageNodeId::FlowUnit(_) => None,
            })
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Uuids of flow-unit nodes.
    pub fn flow_units(&self) -> Vec<Uuid> {
        self.nodes
            .iter()
            .filter_map(|n| match n.id {
                LineageNodeId::FlowUnit(uuid) => Some(uuid),
                LineageNodeId::Event(_) => None,
            })
            .collect()
    }

    pub fn parents_of(&self, id: LineageNodeId) -> Vec<LineageNodeId> {
        self.edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source)
            .collect()
    }

    pub fn children_of(&self, id: LineageNodeId) -> Vec<LineageNodeId> {
        self.edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| e.target)
            .collect()
    }

    /// Nodes without a parent edge.
    pub fn roots(&self) -> Vec<LineageNodeId> {
        let targets: HashSet<LineageNodeId> = self.edges.iter().map(|e| e.target).collect();
        self.nodes
            .iter()
            .map(|n| n.id)
            .filter(|id| !targets.contains(id))
            .collect()
    }

    /// Whether the edges form a DAG (Kahn's algorithm).
    pub fn is_acyclic(&self) -> bool {
        let mut in_degree: HashMap<LineageNodeId, usize> =
            self.nodes.iter().map(|n| (n.id, 0)).collect();
        let mut outgoing: HashMap<LineageNodeId, Vec<LineageNodeId>> = HashMap::new();
        for edge in &self.edges {
            *in_degree.entry(edge.target).or_insert(0) += 1;
            in_degree.entry(edge.source).or_insert(0);
            outgoing.entry(edge.source).or_default().push(edge.target);
        }

        let mut ready: VecDeque<LineageNodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;

        while let Some(id) = ready.pop_front() {
            visited += 1;
            for next in outgoing.get(&id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(*next);
                    }
                }
            }
        }

        visited == in_degree.len()
    }
}

// MARK: - Traversal

/// Builds lineage graphs from an event log on behalf of one identity.
pub(crate) struct LineageBuilder<'a> {
    pub log: &'a dyn EventLog,
    pub authorizer: &'a dyn EventAuthorizer,
    pub identity: &'a Identity,
    pub node_budget: usize,
}

impl LineageBuilder<'_> {
    /// Breadth-first over every flow unit linked to `start`.
    pub fn compute(&self, start: Uuid, is_canceled: &dyn Fn() -> bool) -> Result<LineageGraph> {
        self.build(&[start], true, is_canceled)
    }

    /// One level: the given flow units and their own events, no further links.
    pub fn expand(&self, units: &[Uuid], is_canceled: &dyn Fn() -> bool) -> Result<LineageGraph> {
        self.build(units, false, is_canceled)
    }

    fn build(
        &self,
        start: &[Uuid],
        follow_links: bool,
        is_canceled: &dyn Fn() -> bool,
    ) -> Result<LineageGraph> {
        let mut queue: VecDeque<Uuid> = VecDeque::new();
        let mut queued: HashSet<Uuid> = HashSet::new();
        for uuid in start {
            if queued.insert(*uuid) {
                queue.push_back(*uuid);
            }
        }

        let mut units: Vec<Uuid> = Vec::new();
        let mut events: BTreeMap<u64, ProvenanceEventRecord> = BTreeMap::new();
        let mut truncated = false;

        'traversal: while let Some(uuid) = queue.pop_front() {
            if is_canceled() {
                return Err(ProvenanceError::InvalidRequest(
                    "lineage computation canceled".to_string(),
                ));
            }
            if units.len() + events.len() >= self.node_budget {
                truncated = true;
                break;
            }
            units.push(uuid);

            for event in self.log.events_for_flow_unit(&uuid)? {
                if events.contains_key(&event.event_id) {
                    continue;
                }
                if units.len() + events.len() >= self.node_budget {
                    truncated = true;
                    break 'traversal;
                }
                if follow_links {
                    for related in event.related_uuids() {
                        if queued.insert(related) {
                            queue.push_back(related);
                        }
                    }
                }
                events.insert(event.event_id, event);
            }
        }

        let graph = self.link(&units, &events, truncated);
        if !graph.is_acyclic() {
            return Err(ProvenanceError::CorruptLineage(format!(
                "cycle among lineage of {}",
                start
                    .iter()
                    .map(Uuid::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(graph)
    }

    fn link(
        &self,
        units: &[Uuid],
        events: &BTreeMap<u64, ProvenanceEventRecord>,
        truncated: bool,
    ) -> LineageGraph {
        let mut graph = LineageGraph {
            truncated,
            ..Default::default()
        };
        let mut edges: HashSet<(LineageNodeId, LineageNodeId)> = HashSet::new();
        let mut add_edge = |graph: &mut LineageGraph, source, target, flow_unit_uuid| {
            if edges.insert((source, target)) {
                graph.edges.push(LineageEdge {
                    source,
                    target,
                    flow_unit_uuid,
                });
            }
        };

        // Latest node in each visited flow unit's chain.
        let mut chain_end: HashMap<Uuid, LineageNodeId> = HashMap::new();
        for uuid in units {
            graph.nodes.push(LineageNode::flow_unit(*uuid));
            chain_end.insert(*uuid, LineageNodeId::FlowUnit(*uuid));
        }

        for event in events.values() {
            let visible = self.authorizer.is_authorized(self.identity, event);
            let node_id = LineageNodeId::Event(event.event_id);
            graph.nodes.push(LineageNode::event(event, visible));

            if event.event_type.is_derivation() {
                for parent in &event.parent_uuids {
                    if let Some(previous) = chain_end.insert(*parent, node_id) {
                        add_edge(&mut graph, previous, node_id, *parent);
                    } else {
                        chain_end.remove(parent);
                    }
                }
                for child in &event.child_uuids {
                    if event.parent_uuids.contains(child) || !chain_end.contains_key(child) {
                        continue;
                    }
                    add_edge(&mut graph, node_id, LineageNodeId::FlowUnit(*child), *child);
                }
            } else if let Some(previous) = chain_end.insert(event.flow_unit_uuid, node_id) {
                add_edge(&mut graph, previous, node_id, event.flow_unit_uuid);
            } else {
                chain_end.remove(&event.flow_unit_uuid);
            }
        }

        graph
    }
}

// MARK: - Tests
