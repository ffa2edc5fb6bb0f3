//! What a processor sees of its configuration while triggered.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::error::ProcessError;
use crate::processor::{Processor, PropertyDescriptor};

/// Configuration and scheduling hooks for one processor instance.
#[derive(Debug)]
pub struct ProcessContext {
    component_id: String,
    component_type: String,
    descriptors: Vec<PropertyDescriptor>,
    properties: BTreeMap<String, String>,
    session_config: Arc<SessionConfig>,
    yielded: AtomicBool,
}

impl ProcessContext {
    pub fn new(
        component_id: impl Into<String>,
        component_type: impl Into<String>,
        descriptors: Vec<PropertyDescriptor>,
        session_config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            component_type: component_type.into(),
            descriptors,
            properties: BTreeMap::new(),
            session_config,
            yielded: AtomicBool::new(false),
        }
    }

    /// Build a context from a processor's own declarations.
    pub fn for_processor(
        component_id: impl Into<String>,
        processor: &dyn Processor,
        session_config: Arc<SessionConfig>,
    ) -> Self {
        Self::new(
            component_id,
            processor.component_type(),
            processor.property_descriptors(),
            session_config,
        )
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    pub fn component_type(&self) -> &str {
        &self.component_type
    }

    pub fn session_config(&self) -> &Arc<SessionConfig> {
        &self.session_config
    }

    pub fn descriptors(&self) -> &[PropertyDescriptor] {
        &self.descriptors
    }

    /// Set a property value.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Configured value, falling back to the descriptor default.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str).or_else(|| {
            self.descriptors
                .iter()
                .find(|d| d.name == name)
                .and_then(|d| d.default_value.as_deref())
        })
    }

    /// Parse a property into `T`.
    pub fn parse_property<T>(&self, name: &str) -> Result<T, ProcessError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self
            .property(name)
            .ok_or_else(|| ProcessError::invalid_property(name, "no value configured"))?;
        raw.trim()
            .parse()
            .map_err(|e: T::Err| ProcessError::invalid_property(name, e.to_string()))
    }

    /// Check every configured value against the declared descriptors.
    pub fn validate(&self) -> Result<(), ProcessError> {
        for name in self.properties.keys() {
            if !self.descriptors.iter().any(|d| &d.name == name) {
                return Err(ProcessError::invalid_property(name, "not a supported property"));
            }
        }
        for descriptor in &self.descriptors {
            descriptor.validate(self.property(&descriptor.name))?;
        }
        Ok(())
    }

    /// Ask the scheduler to back off this processor.
    pub fn yield_processor(&self) {
        self.yielded.store(true, Ordering::Release);
    }

    pub fn is_yielded(&self) -> bool {
        self.yielded.load(Ordering::Acquire)
    }

    /// Read and clear the yield request.
    pub fn take_yield(&self) -> bool {
        self.yielded.swap(false, Ordering::AcqRel)
    }
}

impl std::fmt::Display for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[id={}]", self.component_type, self.component_id)
    }
}
