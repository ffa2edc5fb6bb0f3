//! Harness for driving a processor against in-memory queues.
//!
//! ```rust,ignore
//! let mut runner = TestRunner::new(DebugFlow::new());
//! runner.set_property(DebugFlow::FF_FAILURE_ITERATIONS, "1");
//! runner.enqueue(b"Hello, World 1!", [("filename", "testFile1.txt")])?;
//! runner.run(1)?;
//! runner.assert_transfer_count("success", 1);
//! ```

use std::sync::Arc;

use conduit_provenance::{DisabledRepository, ProvenanceRepository};

use crate::config::SessionConfig;
use crate::content::{ContentRepository, InMemoryContentRepository};
use crate::context::ProcessContext;
use crate::error::{ContentError, ProcessError, TransactionError};
use crate::flow_unit::FlowUnit;
use crate::processor::Processor;
use crate::queue::FlowTopology;
use crate::session::ProcessSessionFactory;
use crate::transaction::run_transaction;

/// Runs one processor against its own input queue and output queues.
pub struct TestRunner<P: Processor> {
    processor: P,
    context: ProcessContext,
    factory: ProcessSessionFactory,
    content: Arc<InMemoryContentRepository>,
}

impl<P: Processor> TestRunner<P> {
    /// Runner with default session settings and provenance disabled.
    pub fn new(processor: P) -> Self {
        Self::with_config(processor, SessionConfig::default(), Arc::new(DisabledRepository::new()))
    }

    /// Runner with explicit session settings and provenance repository.
    pub fn with_config(
        processor: P,
        session_config: SessionConfig,
        provenance: Arc<dyn ProvenanceRepository>,
    ) -> Self {
        let component_id = format!("{}-1", processor.component_type());
        let context = ProcessContext::for_processor(component_id, &processor, Arc::new(session_config));
        let topology = Arc::new(FlowTopology::new(processor.relationships()));
        let content = Arc::new(InMemoryContentRepository::new());
        let factory = ProcessSessionFactory::new(
            topology,
            provenance,
            Arc::clone(&content) as Arc<dyn ContentRepository>,
        );

        Self {
            processor,
            context,
            factory,
            content,
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    pub fn provenance(&self) -> &Arc<dyn ProvenanceRepository> {
        self.factory.provenance()
    }

    pub fn session_factory(&self) -> &ProcessSessionFactory {
        &self.factory
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.context.set_property(name, value);
    }

    pub fn validate(&self) -> Result<(), ProcessError> {
        self.context.validate()
    }

    /// Panics if the configured properties are invalid.
    pub fn assert_valid(&self) {
        if let Err(err) = self.validate() {
            panic!("processor configuration is invalid: {}", err);
        }
    }

    /// Store `content` and queue a flow unit carrying `attributes`.
    pub fn enqueue<K, V>(
        &self,
        content: &[u8],
        attributes: impl IntoIterator<Item = (K, V)>,
    ) -> Result<FlowUnit, ContentError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut unit = FlowUnit::new().with_content(self.content.write(content)?);
        for (key, value) in attributes {
            unit = unit.with_attribute(key, value);
        }
        self.factory.topology().enqueue(unit.clone());
        Ok(unit)
    }

    /// Schedule the processor, trigger it `iterations` times, then stop it.
    ///
    /// Returns the errors of failed triggers; scheduling errors abort the run.
    pub fn run(&mut self, iterations: usize) -> Result<Vec<TransactionError>, ProcessError> {
        self.validate()?;
        self.processor.on_scheduled(&self.context)?;

        let mut failures = Vec::new();
        for _ in 0..iterations {
            if let Err(err) = run_transaction(&mut self.processor, &self.context, &self.factory) {
                failures.push(err);
            }
            self.context.take_yield();
        }

        self.processor.on_stopped(&self.context);
        Ok(failures)
    }

    /// Units waiting in the input queue, penalized ones included.
    pub fn queue_size(&self) -> usize {
        self.factory.topology().queue_size()
    }

    /// Copy of the head of the input queue.
    pub fn peek_input(&self) -> Option<FlowUnit> {
        self.factory.topology().peek_input()
    }

    pub fn transfer_count(&self, relationship: &str) -> usize {
        self.factory.topology().output_count(relationship)
    }

    pub fn flow_units_for(&self, relationship: &str) -> Vec<FlowUnit> {
        self.factory.topology().output(relationship)
    }

    pub fn content_of(&self, unit: &FlowUnit) -> Result<Vec<u8>, ContentError> {
        match unit.content() {
            Some(claim) => self.content.read(claim),
            None => Ok(Vec::new()),
        }
    }

    pub fn assert_transfer_count(&self, relationship: &str, expected: usize) {
        assert_eq!(
            self.transfer_count(relationship),
            expected,
            "unexpected number of flow units transferred to '{}'",
            relationship
        );
    }

    /// Panics unless the `index`th unit sent to `relationship` holds `expected`.
    pub fn assert_content_equals(&self, relationship: &str, index: usize, expected: &[u8]) {
        let units = self.flow_units_for(relationship);
        let unit = units.get(index).unwrap_or_else(|| {
            panic!(
                "'{}' holds {} flow units, no index {}",
                relationship,
                units.len(),
                index
            )
        });
        match self.content_of(unit) {
            Ok(actual) => assert_eq!(
                actual,
                expected,
                "content mismatch for {}",
                unit.summary()
            ),
            Err(err) => panic!("cannot read content of {}: {}", unit.summary(), err),
        }
    }
}
