//! Repository contract tests
//!
//! Each test runs against the in-memory, SQLite and disabled variants.

mod common;

use std::sync::Arc;

use common::{all_variants, test_policy, wait_for};
use conduit_provenance::{
    AllowAll, EventType, Identity, LineageTarget, ProvenanceEventRecord, Query, SearchableField,
    SubmissionId, SubmissionStatus,
};
use uuid::Uuid;

fn create(component: &str) -> ProvenanceEventRecord {
    ProvenanceEventRecord::new(EventType::Create, Uuid::new_v4(), component)
}

// === Registration and reads ===

#[test]
fn test_empty_repository_reads() {
    for (name, repo, _dir) in all_variants(Arc::new(AllowAll)) {
        let alice = Identity::new("alice");
        assert_eq!(repo.max_event_id(), 0, "{}", name);
        assert!(repo.get_event(1, &alice).unwrap().is_none(), "{}", name);
        assert!(repo.get_events(1, 10, &alice).unwrap().is_empty(), "{}", name);
    }
}

#[test]
fn test_registration_never_errors_and_reads_past_end_are_empty() {
    for (name, repo, _dir) in all_variants(Arc::new(AllowAll)) {
        let alice = Identity::new("alice");
        let stored = repo
            .register_events(vec![create("gen"), create("gen"), create("gen")])
            .unwrap();
        assert_eq!(stored.len(), 3, "{}", name);

        let past_end = repo.max_event_id() + 1;
        assert!(repo.get_events(past_end, 10, &alice).unwrap().is_empty(), "{}", name);
        assert!(repo.get_event(past_end, &alice).unwrap().is_none(), "{}", name);

        for far in [u64::MAX, 1 << 63] {
            assert!(repo.get_events(far, 10, &alice).unwrap().is_empty(), "{}", name);
            assert!(repo.get_event(far, &alice).unwrap().is_none(), "{}", name);
        }
    }
}

#[test]
fn test_durable_read_after_register() {
    for (name, repo, _dir) in all_variants(Arc::new(AllowAll)) {
        if !repo.is_enabled() {
            continue;
        }
        let alice = Identity::new("alice");
        let stored = repo
            .register_events(vec![create("gen"), create("split")])
            .unwrap();

        assert_eq!(stored[0].event_id, 1, "{}", name);
        assert_eq!(stored[1].event_id, 2, "{}", name);
        assert_eq!(repo.max_event_id(), 2, "{}", name);

        let fetched = repo.get_event(2, &alice).unwrap().unwrap();
        assert_eq!(fetched, stored[1], "{}", name);

        let range = repo.get_events(1, 1, &alice).unwrap();
        assert_eq!(range.len(), 1, "{}", name);
        assert_eq!(range[0].component_id, "gen", "{}", name);
    }
}

#[test]
fn test_enumeration_filters_silently_point_read_reports_unauthorized() {
    for (name, repo, _dir) in all_variants(test_policy()) {
        if !repo.is_enabled() {
            continue;
        }
        repo.register_events(vec![create("gen"), create("secret"), create("split")])
            .unwrap();

        let alice = Identity::new("alice");
        let visible: Vec<u64> = repo
            .get_events(1, 10, &alice)
            .unwrap()
            .iter()
            .map(|e| e.event_id)
            .collect();
        assert_eq!(visible, vec![1, 3], "{}", name);

        let err = repo.get_event(2, &alice).unwrap_err();
        assert!(err.is_unauthorized(), "{}", name);
        assert!(repo.get_event(2, &Identity::new("admin")).unwrap().is_some(), "{}", name);
        assert!(repo.get_event(9, &alice).unwrap().is_none(), "{}", name);
    }
}

// === Submissions ===

#[test]
fn test_query_submission_completes() {
    for (name, repo, _dir) in all_variants(Arc::new(AllowAll)) {
        let alice = Identity::new("alice");
        repo.register_events(vec![create("gen"), create("split")])
            .unwrap();

        let submission = repo
            .submit_query(Query::new().with_term(SearchableField::ComponentId, "gen"), &alice)
            .unwrap();
        wait_for(&submission);
        assert_eq!(submission.status(), SubmissionStatus::Complete, "{}", name);

        let polled = repo
            .retrieve_query_submission(submission.id(), &alice)
            .unwrap();
        let expected = if repo.is_enabled() { 1 } else { 0 };
        assert_eq!(polled.result().unwrap().events.len(), expected, "{}", name);
    }
}

#[test]
fn test_submission_isolation() {
    for (name, repo, _dir) in all_variants(Arc::new(AllowAll)) {
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        repo.register_event(create("gen")).unwrap();

        let query = repo.submit_query(Query::new(), &alice).unwrap();
        let err = repo.retrieve_query_submission(query.id(), &bob).unwrap_err();
        assert!(err.is_unauthorized(), "{}", name);
        assert!(repo.cancel_query_submission(query.id(), &bob).is_err(), "{}", name);

        let lineage = repo
            .submit_lineage_computation(LineageTarget::FlowUnit(Uuid::new_v4()), &alice)
            .unwrap();
        let err = repo.retrieve_lineage_submission(lineage.id(), &bob).unwrap_err();
        assert!(err.is_unauthorized(), "{}", name);
        assert!(repo.retrieve_lineage_submission(lineage.id(), &alice).is_ok(), "{}", name);
    }
}

#[test]
fn test_unknown_submission_is_not_found() {
    for (name, repo, _dir) in all_variants(Arc::new(AllowAll)) {
        let alice = Identity::new("alice");
        let err = repo
            .retrieve_query_submission(SubmissionId::new(), &alice)
            .unwrap_err();
        assert!(err.is_not_found(), "{}", name);

        let err = repo
            .retrieve_lineage_submission(SubmissionId::new(), &alice)
            .unwrap_err();
        assert!(err.is_not_found(), "{}", name);
    }
}

#[test]
fn test_cancel_is_terminal() {
    for (name, repo, _dir) in all_variants(Arc::new(AllowAll)) {
        let alice = Identity::new("alice");
        let submission = repo.submit_query(Query::new(), &alice).unwrap();
        let canceled = repo.cancel_query_submission(submission.id(), &alice).unwrap();
        wait_for(&canceled);

        match canceled.status() {
            SubmissionStatus::Canceled => assert!(canceled.result().is_none(), "{}", name),
            // The worker may finish before the cancel lands.
            SubmissionStatus::Complete => assert!(canceled.result().is_some(), "{}", name),
            other => panic!("{}: unexpected status {}", name, other),
        }
    }
}

#[test]
fn test_query_terms_and_attributes() {
    for (name, repo, _dir) in all_variants(Arc::new(AllowAll)) {
        if !repo.is_enabled() {
            continue;
        }
        let alice = Identity::new("alice");
        let mut attrs = std::collections::BTreeMap::new();
        attrs.insert("filename".to_string(), "Hello-1.txt".to_string());
        repo.register_events(vec![
            create("gen").with_attributes(Default::default(), attrs),
            create("gen"),
            ProvenanceEventRecord::new(EventType::Route, Uuid::new_v4(), "gen")
                .with_relationship("success"),
        ])
        .unwrap();

        let by_attr = repo
            .submit_query(
                Query::new().with_term(SearchableField::Attribute("filename".into()), "hello-*"),
                &alice,
            )
            .unwrap();
        wait_for(&by_attr);
        let result = by_attr.result().unwrap();
        assert_eq!(result.total_hit_count, 1, "{}", name);
        assert_eq!(result.events[0].event_id, 1, "{}", name);

        let by_type = repo
            .submit_query(Query::new().with_term(SearchableField::EventType, "route"), &alice)
            .unwrap();
        wait_for(&by_type);
        assert_eq!(by_type.result().unwrap().events[0].event_id, 3, "{}", name);

        let unindexed = repo.submit_query(
            Query::new().with_term(SearchableField::Attribute("owner".into()), "x"),
            &alice,
        );
        assert!(unindexed.is_err(), "{}", name);
    }
}

#[test]
fn test_query_drops_unauthorized_matches() {
    for (name, repo, _dir) in all_variants(test_policy()) {
        if !repo.is_enabled() {
            continue;
        }
        repo.register_events(vec![create("gen"), create("secret"), create("gen")])
            .unwrap();

        let submission = repo
            .submit_query(Query::new(), &Identity::new("alice"))
            .unwrap();
        wait_for(&submission);
        let result = submission.result().unwrap();
        assert_eq!(result.total_hit_count, 2, "{}", name);
        assert!(result.events.iter().all(|e| e.component_id == "gen"), "{}", name);
    }
}

#[test]
fn test_query_observes_prior_registrations() {
    for (name, repo, _dir) in all_variants(Arc::new(AllowAll)) {
        if !repo.is_enabled() {
            continue;
        }
        let alice = Identity::new("alice");
        for round in 1..=5u64 {
            repo.register_event(create("gen")).unwrap();
            let submission = repo.submit_query(Query::new(), &alice).unwrap();
            wait_for(&submission);
            assert_eq!(submission.result().unwrap().total_hit_count, round, "{}", name);
        }
    }
}

#[test]
fn test_query_terms_fold_non_ascii_case() {
    for (name, repo, _dir) in all_variants(Arc::new(AllowAll)) {
        if !repo.is_enabled() {
            continue;
        }
        let alice = Identity::new("alice");
        repo.register_events(vec![create("gen").with_details("Été"), create("gen").with_details("ete")])
            .unwrap();

        let submission = repo
            .submit_query(Query::new().with_term(SearchableField::Details, "été"), &alice)
            .unwrap();
        wait_for(&submission);
        let result = submission.result().unwrap();
        assert_eq!(result.total_hit_count, 1, "{}", name);
        assert_eq!(result.events[0].event_id, 1, "{}", name);
    }
}
