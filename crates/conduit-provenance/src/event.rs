//! Provenance event records.
//!
//! An event describes one state transition a flow unit underwent. Records are
//! built by a session, buffered until commit, and become immutable once the
//! repository assigns their event id.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProvenanceError, Result};
use crate::search::SearchableField;

// MARK: - Event Type

/// The kind of transition an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A flow unit was created from nothing by a processor.
    Create,
    /// Data was received from an external source.
    Receive,
    /// Content of an existing flow unit was overwritten from an external source.
    Fetch,
    /// Data was sent to an external destination.
    Send,
    /// Content was downloaded by a user or external entity.
    Download,
    /// A flow unit reached the end of its life.
    Drop,
    /// A flow unit aged out of a queue.
    Expire,
    /// One or more children were derived from a parent.
    Fork,
    /// Several parents were merged into one child.
    Join,
    /// An exact copy of a flow unit was made.
    Clone,
    /// Content of a flow unit was modified.
    ContentModified,
    /// Attributes of a flow unit were modified.
    AttributesModified,
    /// A flow unit was routed to a relationship.
    Route,
    /// Additional information was attached to a flow unit.
    AddInfo,
    /// A flow unit was replayed from historical content.
    Replay,
    /// Unknown or unrecognized event type.
    Unknown,
}

impl EventType {
    /// All known event types, in declaration order.
    pub const ALL: [EventType; 16] = [
        EventType::Create,
        EventType::Receive,
        EventType::Fetch,
        EventType::Send,
        EventType::Download,
        EventType::Drop,
        EventType::Expire,
        EventType::Fork,
        EventType::Join,
        EventType::Clone,
        EventType::ContentModified,
        EventType::AttributesModified,
        EventType::Route,
        EventType::AddInfo,
        EventType::Replay,
        EventType::Unknown,
    ];

    /// Whether this event links a flow unit to parents or children.
    pub fn is_derivation(&self) -> bool {
        matches!(
            self,
            EventType::Fork | EventType::Join | EventType::Clone | EventType::Replay
        )
    }

    /// Whether this event ends the life of a flow unit.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Drop | EventType::Expire)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::Create => "CREATE",
            EventType::Receive => "RECEIVE",
            EventType::Fetch => "FETCH",
            EventType::Send => "SEND",
            EventType::Download => "DOWNLOAD",
            EventType::Drop => "DROP",
            EventType::Expire => "EXPIRE",
            EventType::Fork => "FORK",
            EventType::Join => "JOIN",
            EventType::Clone => "CLONE",
            EventType::ContentModified => "CONTENT_MODIFIED",
            EventType::AttributesModified => "ATTRIBUTES_MODIFIED",
            EventType::Route => "ROUTE",
            EventType::AddInfo => "ADDINFO",
            EventType::Replay => "REPLAY",
            EventType::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        Ok(EventType::ALL
            .iter()
            .copied()
            .find(|t| t.to_string() == normalized)
            .unwrap_or(EventType::Unknown))
    }
}

// MARK: - Content Claim

/// Reference to payload bytes held by the external content layer.
///
/// Events carry claims, never the bytes themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentClaim {
    /// Identifier of the stored payload.
    pub id: Uuid,
    /// Payload size in bytes.
    pub size: u64,
}

impl ContentClaim {
    /// Create a claim for a payload of `size` bytes.
    pub fn new(id: Uuid, size: u64) -> Self {
        Self { id, size }
    }
}

// MARK: - Provenance Event Record

/// A single provenance event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEventRecord {
    /// Repository-assigned id; `0` until registered.
    pub event_id: u64,

    /// Kind of transition.
    pub event_type: EventType,

    /// Flow unit the event is about.
    pub flow_unit_uuid: Uuid,

    /// Identity shared by the flow unit and everything derived from the same origin.
    pub lineage_identity: Uuid,

    /// When the transition happened.
    pub timestamp: DateTime<Utc>,

    /// Processor that produced the event.
    pub component_id: String,

    /// Type name of that processor.
    pub component_type: String,

    /// Flow units this one was derived from.
    pub parent_uuids: Vec<Uuid>,

    /// Flow units derived from this one.
    pub child_uuids: Vec<Uuid>,

    /// Attributes before the transition.
    pub previous_attributes: BTreeMap<String, String>,

    /// Attributes changed by the transition.
    pub updated_attributes: BTreeMap<String, String>,

    /// Payload reference after the transition.
    pub content_claim: Option<ContentClaim>,

    /// Relationship the flow unit was routed to, if any.
    pub relationship: Option<String>,

    /// Free-form details.
    pub details: Option<String>,

    /// External URI for RECEIVE/SEND/FETCH events.
    pub transit_uri: Option<String>,
}

impl ProvenanceEventRecord {
    /// Create an unregistered event for `flow_unit_uuid`.
    ///
    /// The lineage identity defaults to the flow unit's own id.
    pub fn new(event_type: EventType, flow_unit_uuid: Uuid, component_id: impl Into<String>) -> Self {
        Self {
            event_id: 0,
            event_type,
            flow_unit_uuid,
            lineage_identity: flow_unit_uuid,
            timestamp: Utc::now(),
            component_id: component_id.into(),
            component_type: String::new(),
            parent_uuids: Vec::new(),
            child_uuids: Vec::new(),
            previous_attributes: BTreeMap::new(),
            updated_attributes: BTreeMap::new(),
            content_claim: None,
            relationship: None,
            details: None,
            transit_uri: None,
        }
    }

    /// Set the lineage identity.
    pub fn with_lineage(mut self, lineage_identity: Uuid) -> Self {
        self.lineage_identity = lineage_identity;
        self
    }

    /// Set the component type.
    pub fn with_component_type(mut self, component_type: impl Into<String>) -> Self {
        self.component_type = component_type.into();
        self
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add parent flow units.
    pub fn with_parents(mut self, parents: impl IntoIterator<Item = Uuid>) -> Self {
        for parent in parents {
            if !self.parent_uuids.contains(&parent) {
                self.parent_uuids.push(parent);
            }
        }
        self
    }

    /// Add child flow units.
    pub fn with_children(mut self, children: impl IntoIterator<Item = Uuid>) -> Self {
        for child in children {
            if !self.child_uuids.contains(&child) {
                self.child_uuids.push(child);
            }
        }
        self
    }

    /// Record attribute state before and after the transition.
    pub fn with_attributes(
        mut self,
        previous: BTreeMap<String, String>,
        updated: BTreeMap<String, String>,
    ) -> Self {
        self.previous_attributes = previous;
        self.updated_attributes = updated;
        self
    }

    /// Set the content claim.
    pub fn with_content(mut self, claim: ContentClaim) -> Self {
        self.content_claim = Some(claim);
        self
    }

    /// Set the relationship.
    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship = Some(relationship.into());
        self
    }

    /// Set free-form details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Set the transit URI.
    pub fn with_transit_uri(mut self, uri: impl Into<String>) -> Self {
        self.transit_uri = Some(uri.into());
        self
    }

    /// Whether the repository has assigned an id.
    pub fn is_registered(&self) -> bool {
        self.event_id != 0
    }

    /// Current value of an attribute as of this event.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.updated_attributes
            .get(name)
            .or_else(|| self.previous_attributes.get(name))
            .map(String::as_str)
    }

    /// Attributes as of this event (previous overlaid with updates).
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut merged = self.previous_attributes.clone();
        for (k, v) in &self.updated_attributes {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Value of a searchable field, as a string.
    pub fn field_value(&self, field: &SearchableField) -> Option<String> {
        match field {
            SearchableField::EventType => Some(self.event_type.to_string()),
            SearchableField::FlowUnitUuid => Some(self.flow_unit_uuid.to_string()),
            SearchableField::LineageIdentity => Some(self.lineage_identity.to_string()),
            SearchableField::ComponentId => Some(self.component_id.clone()),
            SearchableField::ComponentType => Some(self.component_type.clone()),
            SearchableField::Relationship => self.relationship.clone(),
            SearchableField::Details => self.details.clone(),
            SearchableField::TransitUri => self.transit_uri.clone(),
            SearchableField::Attribute(name) => self.attribute(name).map(str::to_string),
        }
    }

    /// Every flow unit this event links to, including its own.
    pub fn related_uuids(&self) -> impl Iterator<Item = Uuid> + '_ {
        std::iter::once(self.flow_unit_uuid)
            .chain(self.parent_uuids.iter().copied())
            .chain(self.child_uuids.iter().copied())
    }

    /// Check the record before registration.
    pub fn validate(&self) -> Result<()> {
        if self.is_registered() {
            return Err(ProvenanceError::InvalidEvent(format!(
                "event already carries id {}; ids are assigned by the repository",
                self.event_id
            )));
        }
        if self.component_id.is_empty() {
            return Err(ProvenanceError::InvalidEvent(format!(
                "{} event for {} has no component id",
                self.event_type, self.flow_unit_uuid
            )));
        }
        if self.event_type.is_derivation()
            && (self.parent_uuids.is_empty() || self.child_uuids.is_empty())
        {
            return Err(ProvenanceError::InvalidEvent(format!(
                "{} event for {} must name at least one parent and one child",
                self.event_type, self.flow_unit_uuid
            )));
        }
        Ok(())
    }
}

// MARK: - Tests
