//! Caller identities and event-level authorization.
//!
//! Every read against the repository is scoped to an [`Identity`]. An
//! [`EventAuthorizer`] decides which events that identity may see.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::event::ProvenanceEventRecord;

/// The caller on whose behalf a read or submission is made.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Create an identity from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The identity's name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Decides whether an identity may see an event.
pub trait EventAuthorizer: Send + Sync {
    /// Whether `identity` may see `event`.
    fn is_authorized(&self, identity: &Identity, event: &ProvenanceEventRecord) -> bool;
}

/// Authorizer that lets everyone see everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl EventAuthorizer for AllowAll {
    fn is_authorized(&self, _identity: &Identity, _event: &ProvenanceEventRecord) -> bool {
        true
    }
}

/// Grants identities read access to the events of specific components.
#[derive(Debug, Default, Clone)]
pub struct ComponentAccessPolicy {
    grants: HashMap<Identity, HashSet<String>>,
    superusers: HashSet<Identity>,
}

impl ComponentAccessPolicy {
    /// Create a policy with no grants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `identity` to see events produced by `component_id`.
    pub fn grant(mut self, identity: impl Into<Identity>, component_id: impl Into<String>) -> Self {
        self.grants
            .entry(identity.into())
            .or_default()
            .insert(component_id.into());
        self
    }

    /// Allow `identity` to see every event.
    pub fn grant_all(mut self, identity: impl Into<Identity>) -> Self {
        self.superusers.insert(identity.into());
        self
    }
}

impl EventAuthorizer for ComponentAccessPolicy {
    fn is_authorized(&self, identity: &Identity, event: &ProvenanceEventRecord) -> bool {
        self.superusers.contains(identity)
            || self
                .grants
                .get(identity)
                .map(|components| components.contains(&event.component_id))
                .unwrap_or(false)
    }
}
