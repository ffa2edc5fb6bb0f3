//! Shared helpers for conduit-core integration tests

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use conduit_core::{ProcessContext, ProcessError, ProcessSession, Processor, Relationship};
use conduit_provenance::{
    DurableRepository, Identity, LineageSubmission, LineageTarget, ProvenanceError,
    ProvenanceEventRecord, ProvenanceRepository, Query, QuerySubmission, Result, SearchableField,
    SubmissionId,
};

type Script =
    Box<dyn FnMut(&ProcessContext, &mut ProcessSession) -> std::result::Result<(), ProcessError> + Send>;

/// A processor whose trigger logic is a closure.
pub struct Scripted {
    script: Script,
}

impl Scripted {
    pub fn new(
        script: impl FnMut(&ProcessContext, &mut ProcessSession) -> std::result::Result<(), ProcessError>
            + Send
            + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
        }
    }
}

impl Processor for Scripted {
    fn component_type(&self) -> &str {
        "Scripted"
    }

    fn relationships(&self) -> Vec<Relationship> {
        vec![Relationship::success(), Relationship::failure()]
    }

    fn on_trigger(
        &mut self,
        context: &ProcessContext,
        session: &mut ProcessSession,
    ) -> std::result::Result<(), ProcessError> {
        (self.script)(context, session)
    }
}

/// Repository that can be told to reject every registration.
pub struct RejectingRepository {
    inner: DurableRepository,
    reject: AtomicBool,
}

impl RejectingRepository {
    pub fn new() -> Self {
        Self {
            inner: DurableRepository::in_memory().unwrap(),
            reject: AtomicBool::new(true),
        }
    }

    pub fn set_rejecting(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Every registered event, as seen by an all-access identity.
    pub fn stored(&self) -> Vec<ProvenanceEventRecord> {
        self.inner.get_events(1, 10_000, &Identity::new("test")).unwrap()
    }
}

impl ProvenanceRepository for RejectingRepository {
    fn register_events(&self, events: Vec<ProvenanceEventRecord>) -> Result<Vec<ProvenanceEventRecord>> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(ProvenanceError::Storage("disk full".to_string()));
        }
        self.inner.register_events(events)
    }

    fn get_event(&self, event_id: u64, identity: &Identity) -> Result<Option<ProvenanceEventRecord>> {
        self.inner.get_event(event_id, identity)
    }

    fn get_events(
        &self,
        first_id: u64,
        max_records: usize,
        identity: &Identity,
    ) -> Result<Vec<ProvenanceEventRecord>> {
        self.inner.get_events(first_id, max_records, identity)
    }

    fn max_event_id(&self) -> u64 {
        self.inner.max_event_id()
    }

    fn searchable_fields(&self) -> Vec<SearchableField> {
        self.inner.searchable_fields()
    }

    fn searchable_attributes(&self) -> Vec<String> {
        self.inner.searchable_attributes()
    }

    fn submit_query(&self, query: Query, identity: &Identity) -> Result<Arc<QuerySubmission>> {
        self.inner.submit_query(query, identity)
    }

    fn retrieve_query_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<QuerySubmission>> {
        self.inner.retrieve_query_submission(id, identity)
    }

    fn cancel_query_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<QuerySubmission>> {
        self.inner.cancel_query_submission(id, identity)
    }

    fn submit_lineage_computation(
        &self,
        target: LineageTarget,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        self.inner.submit_lineage_computation(target, identity)
    }

    fn submit_expand_parents(&self, event_id: u64, identity: &Identity) -> Result<Arc<LineageSubmission>> {
        self.inner.submit_expand_parents(event_id, identity)
    }

    fn submit_expand_children(&self, event_id: u64, identity: &Identity) -> Result<Arc<LineageSubmission>> {
        self.inner.submit_expand_children(event_id, identity)
    }

    fn retrieve_lineage_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        self.inner.retrieve_lineage_submission(id, identity)
    }

    fn cancel_lineage_submission(
        &self,
        id: SubmissionId,
        identity: &Identity,
    ) -> Result<Arc<LineageSubmission>> {
        self.inner.cancel_lineage_submission(id, identity)
    }

    fn purge_expired_submissions(&self) -> Result<usize> {
        self.inner.purge_expired_submissions()
    }
}

/// In-memory sink for `tracing` output.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Run `f` with a subscriber writing into this sink.
    pub fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
