//! Shared helpers for provenance integration tests

use std::sync::Arc;
use std::time::Duration;

use conduit_provenance::{
    ComponentAccessPolicy, DisabledRepository, DurableRepository, EventAuthorizer, InMemoryEventLog,
    ProvenanceConfig, ProvenanceRepository, SqliteEventLog, Submission,
};

/// Poll until the submission reaches a terminal state.
pub fn wait_for<R>(submission: &Submission<R>) {
    for _ in 0..1000 {
        if submission.status().is_terminal() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("submission {} never finished", submission.id());
}

/// Alice sees the "gen" and "split" components; admin sees everything.
#[allow(dead_code)]
pub fn test_policy() -> Arc<dyn EventAuthorizer> {
    Arc::new(
        ComponentAccessPolicy::new()
            .grant("alice", "gen")
            .grant("alice", "split")
            .grant_all("admin"),
    )
}

/// Every repository variant under test, by name.
///
/// The SQLite variant keeps its temp dir alive alongside the repository.
#[allow(dead_code)]
pub fn all_variants(
    authorizer: Arc<dyn EventAuthorizer>,
) -> Vec<(&'static str, Arc<dyn ProvenanceRepository>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteEventLog::open(dir.path().join("provenance.db")).unwrap();

    vec![
        (
            "in-memory",
            Arc::new(
                DurableRepository::new(
                    Arc::new(InMemoryEventLog::new()),
                    Arc::clone(&authorizer),
                    ProvenanceConfig::default(),
                )
                .unwrap(),
            ) as Arc<dyn ProvenanceRepository>,
            None,
        ),
        (
            "sqlite",
            Arc::new(
                DurableRepository::new(Arc::new(sqlite), authorizer, ProvenanceConfig::default())
                    .unwrap(),
            ) as Arc<dyn ProvenanceRepository>,
            Some(dir),
        ),
        (
            "disabled",
            Arc::new(DisabledRepository::new()) as Arc<dyn ProvenanceRepository>,
            None,
        ),
    ]
}
