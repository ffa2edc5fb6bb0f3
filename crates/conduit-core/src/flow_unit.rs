//! Flow units: the records that move through a flow.
//!
//! A flow unit is an identity, a set of attributes and a reference to its
//! payload. Values handed to processors are snapshots; the owning session
//! holds the authoritative copy until commit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use conduit_provenance::ContentClaim;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Attribute names every flow unit carries.
pub mod core_attributes {
    /// Immutable identity; mirrors [`FlowUnit::uuid`](super::FlowUnit::uuid)
    pub const UUID: &str = "uuid";
    /// Logical file name
    pub const FILENAME: &str = "filename";
    /// Logical directory
    pub const PATH: &str = "path";
    /// MIME type of the payload, when known
    pub const MIME_TYPE: &str = "mime.type";
}

/// A unit of data in a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowUnit {
    uuid: Uuid,
    lineage_identity: Uuid,
    attributes: BTreeMap<String, String>,
    content: Option<ContentClaim>,
    entry_date: DateTime<Utc>,
    penalized_until: Option<DateTime<Utc>>,
    penalty_count: u32,
}

impl FlowUnit {
    /// Create a flow unit that starts its own lineage.
    pub fn new() -> Self {
        let uuid = Uuid::new_v4();
        let mut attributes = BTreeMap::new();
        attributes.insert(core_attributes::UUID.to_string(), uuid.to_string());
        attributes.insert(core_attributes::FILENAME.to_string(), uuid.to_string());
        attributes.insert(core_attributes::PATH.to_string(), "./".to_string());

        Self {
            uuid,
            lineage_identity: uuid,
            attributes,
            content: None,
            entry_date: Utc::now(),
            penalized_until: None,
            penalty_count: 0,
        }
    }

    /// Create a flow unit derived from `lineage_identity`.
    ///
    /// Attributes are inherited from `template`, except the identity.
    pub(crate) fn derived(template: &FlowUnit, lineage_identity: Uuid) -> Self {
        let mut unit = Self::new();
        for (key, value) in &template.attributes {
            if key != core_attributes::UUID {
                unit.attributes.insert(key.clone(), value.clone());
            }
        }
        unit.lineage_identity = lineage_identity;
        unit
    }

    /// Create a flow unit merged from `parents`, keeping only the attributes
    /// every parent agrees on. Lineage follows the first parent.
    pub(crate) fn merged(parents: &[FlowUnit]) -> Option<Self> {
        let (first, rest) = parents.split_first()?;
        let mut unit = Self::new();
        unit.lineage_identity = first.lineage_identity;
        for (key, value) in &first.attributes {
            if key != core_attributes::UUID && rest.iter().all(|p| p.attributes.get(key) == Some(value)) {
                unit.attributes.insert(key.clone(), value.clone());
            }
        }
        Some(unit)
    }

    /// Set an attribute (builder style, for units built outside a session).
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key.into(), value.into());
        self
    }

    /// Attach content (builder style).
    pub fn with_content(mut self, claim: ContentClaim) -> Self {
        self.content = Some(claim);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn lineage_identity(&self) -> Uuid {
        self.lineage_identity
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn content(&self) -> Option<&ContentClaim> {
        self.content.as_ref()
    }

    /// Payload size in bytes, `0` without content.
    pub fn size(&self) -> u64 {
        self.content.map(|c| c.size).unwrap_or(0)
    }

    pub fn entry_date(&self) -> DateTime<Utc> {
        self.entry_date
    }

    pub fn penalty_count(&self) -> u32 {
        self.penalty_count
    }

    pub fn penalized_until(&self) -> Option<DateTime<Utc>> {
        self.penalized_until
    }

    /// Whether the unit is still serving a penalty at `now`.
    pub fn is_penalized(&self, now: DateTime<Utc>) -> bool {
        self.penalized_until.map(|until| until > now).unwrap_or(false)
    }

    /// The `uuid` attribute is fixed; writes to it are ignored.
    pub(crate) fn set_attribute(&mut self, key: String, value: String) -> bool {
        if key == core_attributes::UUID {
            return false;
        }
        self.attributes.insert(key, value);
        true
    }

    pub(crate) fn remove_attribute(&mut self, key: &str) -> Option<String> {
        if key == core_attributes::UUID {
            return None;
        }
        self.attributes.remove(key)
    }

    pub(crate) fn set_content(&mut self, claim: ContentClaim) {
        self.content = Some(claim);
    }

    pub(crate) fn penalize(&mut self, duration: std::time::Duration) {
        let duration = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        self.penalized_until = Some(Utc::now().checked_add_signed(duration).unwrap_or(DateTime::<Utc>::MAX_UTC));
        self.penalty_count = self.penalty_count.saturating_add(1);
    }

    /// Short description used in logs.
    pub fn summary(&self) -> String {
        format!(
            "FlowUnit[uuid={}, filename={}, size={}]",
            self.uuid,
            self.attribute(core_attributes::FILENAME).unwrap_or(""),
            self.size()
        )
    }
}

impl Default for FlowUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FlowUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}
