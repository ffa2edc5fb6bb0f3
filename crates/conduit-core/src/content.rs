//! Boundary to the content layer that stores payload bytes.
//!
//! Sessions never mutate stored bytes: every write creates a new claim.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use conduit_provenance::ContentClaim;
use uuid::Uuid;

use crate::error::ContentError;

/// Storage for flow-unit payloads.
pub trait ContentRepository: Send + Sync {
    /// Store `bytes` under a new claim.
    fn write(&self, bytes: &[u8]) -> Result<ContentClaim, ContentError>;

    /// Read the bytes behind a claim.
    fn read(&self, claim: &ContentClaim) -> Result<Vec<u8>, ContentError>;

    /// Release a claim nothing references any more. Returns whether it existed.
    fn remove(&self, claim: &ContentClaim) -> bool;
}

/// Volatile content store.
#[derive(Debug, Default)]
pub struct InMemoryContentRepository {
    claims: RwLock<HashMap<Uuid, Arc<Vec<u8>>>>,
}

impl InMemoryContentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live claims.
    pub fn len(&self) -> usize {
        self.claims.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentRepository for InMemoryContentRepository {
    fn write(&self, bytes: &[u8]) -> Result<ContentClaim, ContentError> {
        let claim = ContentClaim::new(Uuid::new_v4(), bytes.len() as u64);
        self.claims
            .write()
            .map_err(|e| ContentError::Storage(e.to_string()))?
            .insert(claim.id, Arc::new(bytes.to_vec()));
        Ok(claim)
    }

    fn read(&self, claim: &ContentClaim) -> Result<Vec<u8>, ContentError> {
        self.claims
            .read()
            .map_err(|e| ContentError::Storage(e.to_string()))?
            .get(&claim.id)
            .map(|bytes| bytes.as_ref().clone())
            .ok_or(ContentError::NotFound(claim.id))
    }

    fn remove(&self, claim: &ContentClaim) -> bool {
        self.claims
            .write()
            .map(|mut claims| claims.remove(&claim.id).is_some())
            .unwrap_or(false)
    }
}
