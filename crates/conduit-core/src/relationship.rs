//! Named outputs of a processor.

use serde::{Deserialize, Serialize};

/// A named route a processor can transfer flow units to.
///
/// Relationships compare by name only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    name: String,
    description: String,
}

impl Relationship {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// The conventional `success` relationship.
    pub fn success() -> Self {
        Self::new("success", "Flow units processed successfully")
    }

    /// The conventional `failure` relationship.
    pub fn failure() -> Self {
        Self::new("failure", "Flow units that could not be processed")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Relationship {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Relationship {}

impl std::hash::Hash for Relationship {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
