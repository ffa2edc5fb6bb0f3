//! The processor contract and property descriptors.

use serde::{Deserialize, Serialize};

use crate::context::ProcessContext;
use crate::error::ProcessError;
use crate::relationship::Relationship;
use crate::session::ProcessSession;

// MARK: - Property Descriptors

/// Value types a property accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// Unsigned integer
    NonNegativeInteger,
    /// Any text
    Text,
}

/// Declares one configurable property of a processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub description: String,
    pub default_value: Option<String>,
    pub kind: PropertyKind,
    pub required: bool,
}

impl PropertyDescriptor {
    /// A required text property without a default.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default_value: None,
            kind: PropertyKind::Text,
            required: true,
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_kind(mut self, kind: PropertyKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Check a configured value against this descriptor.
    pub fn validate(&self, value: Option<&str>) -> Result<(), ProcessError> {
        let value = match value {
            Some(v) => v,
            None if self.required => {
                return Err(ProcessError::invalid_property(&self.name, "a value is required"))
            }
            None => return Ok(()),
        };

        match self.kind {
            PropertyKind::NonNegativeInteger => value.trim().parse::<u64>().map(|_| ()).map_err(|_| {
                ProcessError::invalid_property(
                    &self.name,
                    format!("'{}' is not a non-negative integer", value),
                )
            }),
            PropertyKind::Text => Ok(()),
        }
    }
}

// MARK: - Processor

/// A unit of work that consumes and emits flow units inside a session.
///
/// Processors are invoked through
/// [`run_transaction`](crate::transaction::run_transaction), which commits the
/// session when `on_trigger` returns `Ok` and rolls it back otherwise.
pub trait Processor: Send {
    /// Type name used in logs and provenance events.
    fn component_type(&self) -> &str;

    /// Relationships this processor can transfer to.
    fn relationships(&self) -> Vec<Relationship>;

    /// Configurable properties.
    fn property_descriptors(&self) -> Vec<PropertyDescriptor> {
        Vec::new()
    }

    /// Called once before a run of triggers.
    fn on_scheduled(&mut self, _context: &ProcessContext) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Process work inside `session`.
    fn on_trigger(
        &mut self,
        context: &ProcessContext,
        session: &mut ProcessSession,
    ) -> Result<(), ProcessError>;

    /// Called once after a run of triggers.
    fn on_stopped(&mut self, _context: &ProcessContext) {}
}
