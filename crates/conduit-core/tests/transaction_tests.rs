//! Commit and rollback through the transaction wrapper

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CapturedLogs, RejectingRepository, Scripted};
use conduit_core::{
    ProcessError, SessionConfig, SessionError, SessionState, TestRunner, TransactionError,
};
use conduit_core::{ProcessContext, ProcessSession, Relationship};
use conduit_provenance::{DurableRepository, EventType, Identity, ProvenanceRepository};
use proptest::prelude::*;

fn far_future() -> chrono::DateTime<Utc> {
    Utc::now() + Duration::days(1)
}

#[test]
fn test_success_commits_transfers_and_events() {
    let provenance = Arc::new(DurableRepository::in_memory().unwrap());
    let mut runner = TestRunner::with_config(
        Scripted::new(|_, session| {
            if let Some(unit) = session.get()? {
                let unit = session.write(&unit, b"processed")?;
                session.transfer(&unit, &Relationship::success())?;
            }
            Ok(())
        }),
        SessionConfig::default(),
        provenance.clone(),
    );
    runner.enqueue(b"raw", [("filename", "in.txt")]).unwrap();

    let failures = runner.run(1).unwrap();
    assert!(failures.is_empty());
    runner.assert_transfer_count("success", 1);
    runner.assert_content_equals("success", 0, b"processed");
    assert_eq!(runner.queue_size(), 0);

    let events = provenance.get_events(1, 10, &Identity::new("ops")).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::ContentModified);
    assert_eq!(events[0].component_id, "Scripted-1");
    assert_eq!(events[0].relationship.as_deref(), Some("success"));
}

#[test]
fn test_processor_error_rolls_back_with_penalty() {
    let mut runner = TestRunner::new(Scripted::new(|_, session| {
        let unit = session.get()?.ok_or_else(|| ProcessError::failure("queue empty"))?;
        let unit = session.put_attribute(&unit, "filename", "mangled")?;
        session.write(&unit, b"half-written")?;
        Err(ProcessError::failure("downstream unavailable"))
    }));
    runner.enqueue(b"original", [("filename", "in.txt")]).unwrap();

    let failures = runner.run(1).unwrap();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].process_error(),
        Some(ProcessError::Failure(message)) if message == "downstream unavailable"
    ));

    runner.assert_transfer_count("success", 0);
    assert_eq!(runner.queue_size(), 1);
    let head = runner.peek_input().unwrap();
    assert_eq!(head.attribute("filename"), Some("in.txt"));
    assert_eq!(runner.content_of(&head).unwrap(), b"original");
    assert_eq!(head.penalty_count(), 1);
    assert!(head.is_penalized(Utc::now()));
}

#[test]
fn test_panic_is_rolled_back_like_an_error() {
    let mut runner = TestRunner::new(Scripted::new(|_, session| {
        let unit = session.get()?;
        if unit.is_some() {
            panic!("kaboom");
        }
        Ok(())
    }));
    runner.enqueue(b"payload", [("filename", "in.txt")]).unwrap();

    let failures = runner.run(1).unwrap();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].process_error(),
        Some(ProcessError::Panicked(message)) if message.contains("kaboom")
    ));
    assert_eq!(runner.queue_size(), 1);
    runner.assert_transfer_count("success", 0);
}

#[test]
fn test_rejected_registration_publishes_nothing() {
    let provenance = Arc::new(RejectingRepository::new());
    let mut runner = TestRunner::with_config(
        Scripted::new(|_, session| {
            let parent = session.get()?.ok_or_else(|| ProcessError::failure("queue empty"))?;
            let child = session.create_child(&parent)?;
            let child = session.write(&child, b"derived")?;
            session.transfer(&parent, &Relationship::success())?;
            session.transfer(&child, &Relationship::success())?;
            Ok(())
        }),
        SessionConfig::default(),
        provenance.clone(),
    );
    runner.enqueue(b"payload", [("filename", "in.txt")]).unwrap();

    let failures = runner.run(1).unwrap();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        &failures[0],
        TransactionError::Commit(SessionError::Provenance(_))
    ));
    runner.assert_transfer_count("success", 0);
    assert!(provenance.stored().is_empty());
    assert_eq!(runner.queue_size(), 1);

    // a failed commit requeues without penalty, so the retry can lease it
    provenance.set_rejecting(false);
    assert!(runner.run(1).unwrap().is_empty());
    runner.assert_transfer_count("success", 2);
    let types: Vec<EventType> = provenance.stored().iter().map(|e| e.event_type).collect();
    assert_eq!(types, vec![EventType::Fork, EventType::ContentModified]);
}

#[test]
fn test_unacknowledged_units_logged_when_enabled() {
    let script = |_: &ProcessContext, session: &mut ProcessSession| -> Result<(), ProcessError> {
        session.get_batch(3)?;
        Err(ProcessError::failure("gave up"))
    };

    let logs = CapturedLogs::new();
    let mut runner = TestRunner::with_config(
        Scripted::new(script),
        SessionConfig::default().with_unacknowledged_logging(2),
        Arc::new(conduit_provenance::DisabledRepository::new()),
    );
    let first = runner.enqueue(b"1", [("filename", "one.txt")]).unwrap();
    runner.enqueue(b"2", [("filename", "two.txt")]).unwrap();
    runner.enqueue(b"3", [("filename", "three.txt")]).unwrap();

    logs.capture(|| runner.run(1).unwrap());
    let output = logs.contents();
    assert!(output.contains("Scripted[id=Scripted-1] failed to process (unacknowledged flow units ["));
    assert!(output.contains(&first.uuid().to_string()));
    assert!(output.contains("one.txt"));
    assert!(!output.contains("three.txt"));
    assert!(output.contains("(+1 more)) due to gave up; rolling back session"));
    assert_eq!(runner.queue_size(), 3);

    let quiet = CapturedLogs::new();
    let mut runner = TestRunner::new(Scripted::new(script));
    runner.enqueue(b"1", [("filename", "one.txt")]).unwrap();
    quiet.capture(|| runner.run(1).unwrap());
    let output = quiet.contents();
    assert!(output.contains("failed to process due to gave up; rolling back session"));
    assert!(!output.contains("unacknowledged"));
}

#[test]
fn test_processor_may_end_the_session_itself() {
    let mut runner = TestRunner::new(Scripted::new(|_, session| {
        if let Some(unit) = session.get()? {
            session.transfer(&unit, &Relationship::failure())?;
            session.commit()?;
            assert_eq!(session.state(), SessionState::Committed);
        }
        Ok(())
    }));
    runner.enqueue(b"payload", [("filename", "in.txt")]).unwrap();

    assert!(runner.run(1).unwrap().is_empty());
    runner.assert_transfer_count("failure", 1);
}

#[test]
fn test_operations_after_commit_are_rejected() {
    let mut runner = TestRunner::new(Scripted::new(|_, session| {
        if let Some(unit) = session.get()? {
            session.transfer(&unit, &Relationship::success())?;
            session.commit()?;
            session.get()?;
        }
        Ok(())
    }));
    runner.enqueue(b"a", [("filename", "a.txt")]).unwrap();
    runner.enqueue(b"b", [("filename", "b.txt")]).unwrap();

    let failures = runner.run(1).unwrap();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].process_error(),
        Some(ProcessError::Session(SessionError::InvalidState {
            operation: "get",
            state: SessionState::Committed
        }))
    ));
    // the committed transfer stands and the second unit was never leased
    runner.assert_transfer_count("success", 1);
    assert_eq!(runner.queue_size(), 1);
}

#[test]
fn test_unacknowledged_commit_fails_the_transaction() {
    let mut runner = TestRunner::new(Scripted::new(|_, session| {
        session.get()?;
        Ok(())
    }));
    runner.enqueue(b"a", [("filename", "a.txt")]).unwrap();

    let failures = runner.run(1).unwrap();
    assert!(matches!(
        &failures[0],
        TransactionError::Commit(SessionError::UnacknowledgedFlowUnits { count: 1, .. })
    ));
    assert_eq!(runner.queue_size(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_failed_transaction_preserves_queue(
        contents in prop::collection::vec("[a-z]{0,12}", 1..8),
        leased in 0usize..8,
    ) {
        let mut runner = TestRunner::new(Scripted::new(move |_, session| {
            for unit in session.get_batch(leased)? {
                let unit = session.put_attribute(&unit, "filename", "changed")?;
                let unit = session.write(&unit, b"overwritten")?;
                session.transfer(&unit, &Relationship::success())?;
            }
            Err(ProcessError::failure("fail after transfers"))
        }));

        let originals: Vec<_> = contents
            .iter()
            .enumerate()
            .map(|(i, body)| {
                runner
                    .enqueue(body.as_bytes(), [("filename", format!("file-{}", i))])
                    .unwrap()
            })
            .collect();

        let failures = runner.run(1).unwrap();
        prop_assert_eq!(failures.len(), 1);
        prop_assert_eq!(runner.transfer_count("success"), 0);

        let queued = runner.session_factory().topology().poll_batch(usize::MAX, far_future());
        prop_assert_eq!(queued.len(), originals.len());
        for (queued, original) in queued.iter().zip(&originals) {
            prop_assert_eq!(queued.uuid(), original.uuid());
            prop_assert_eq!(queued.attributes(), original.attributes());
            prop_assert_eq!(runner.content_of(queued).unwrap(), runner.content_of(original).unwrap());
        }
    }
}
