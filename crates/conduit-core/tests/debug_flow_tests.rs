//! DebugFlow driven through the test runner

use std::collections::HashMap;

use chrono::Utc;
use conduit_core::{DebugFlow, Processor, TestRunner};

const CONTENT_1: &[u8] = b"Hello, World 1!";
const CONTENT_2: &[u8] = b"Hello, World 2!";
const CONTENT_3: &[u8] = b"Hello, World 3!";

/// Runner configured so flow units go to success and idle triggers do nothing.
fn runner() -> TestRunner<DebugFlow> {
    let mut runner = TestRunner::new(DebugFlow::new());
    runner.set_property(DebugFlow::FF_SUCCESS_ITERATIONS, "1");
    runner.set_property(DebugFlow::FF_FAILURE_ITERATIONS, "0");
    runner.set_property(DebugFlow::FF_ROLLBACK_ITERATIONS, "0");
    runner.set_property(DebugFlow::FF_ROLLBACK_YIELD_ITERATIONS, "0");
    runner.set_property(DebugFlow::FF_ROLLBACK_PENALTY_ITERATIONS, "0");
    runner.set_property(DebugFlow::FF_EXCEPTION_ITERATIONS, "0");
    runner.set_property(DebugFlow::NO_FF_EXCEPTION_ITERATIONS, "0");
    runner.set_property(DebugFlow::NO_FF_YIELD_ITERATIONS, "0");
    runner.set_property(DebugFlow::NO_FF_SKIP_ITERATIONS, "1");
    runner
}

/// Only the named flow-unit response is enabled, once per cycle.
fn runner_with_only(property: &str) -> TestRunner<DebugFlow> {
    let mut runner = runner();
    runner.set_property(DebugFlow::FF_SUCCESS_ITERATIONS, "0");
    runner.set_property(property, "1");
    runner
}

fn enqueue_three(runner: &TestRunner<DebugFlow>) {
    runner
        .enqueue(CONTENT_1, [("filename", "testFile1.txt"), ("uuid", "TESTING-1234-TESTING")])
        .unwrap();
    runner
        .enqueue(CONTENT_2, [("filename", "testFile2.txt"), ("uuid", "TESTING-2345-TESTING")])
        .unwrap();
    runner
        .enqueue(CONTENT_3, [("filename", "testFile3.txt"), ("uuid", "TESTING-3456-TESTING")])
        .unwrap();
}

fn names_to_content() -> HashMap<&'static str, &'static [u8]> {
    HashMap::from([
        ("testFile1.txt", CONTENT_1),
        ("testFile2.txt", CONTENT_2),
        ("testFile3.txt", CONTENT_3),
    ])
}

/// The head of the queue still carries the content it was enqueued with.
fn assert_head_unchanged(runner: &TestRunner<DebugFlow>) {
    let head = runner.peek_input().unwrap();
    let filename = head.attribute("filename").unwrap();
    assert_eq!(runner.content_of(&head).unwrap(), names_to_content()[filename]);
}

#[test]
fn test_supported_property_descriptors() {
    assert_eq!(DebugFlow::new().property_descriptors().len(), 9);
}

#[test]
fn test_relationships() {
    assert_eq!(DebugFlow::new().relationships().len(), 2);
}

#[test]
fn test_flow_unit_max_success_is_zero_until_scheduled() {
    let mut runner = runner();
    assert_eq!(runner.processor().flow_unit_max_success(), 0);
    runner.assert_valid();
    runner.run(1).unwrap();

    let configured: u64 = runner
        .context()
        .parse_property(DebugFlow::FF_SUCCESS_ITERATIONS)
        .unwrap();
    assert_eq!(runner.processor().flow_unit_max_success(), configured);
}

#[test]
fn test_no_flow_unit_max_skip_is_zero_until_scheduled() {
    let mut runner = runner();
    assert_eq!(runner.processor().no_flow_unit_max_skip(), 0);
    runner.assert_valid();
    runner.run(1).unwrap();

    let configured: u64 = runner
        .context()
        .parse_property(DebugFlow::NO_FF_SKIP_ITERATIONS)
        .unwrap();
    assert_eq!(runner.processor().no_flow_unit_max_skip(), configured);
}

#[test]
fn test_success() {
    let mut runner = runner();
    runner.assert_valid();
    enqueue_three(&runner);

    assert!(runner.run(4).unwrap().is_empty());
    runner.assert_transfer_count("success", 3);
    runner.assert_transfer_count("failure", 0);

    runner.assert_content_equals("success", 0, CONTENT_1);
    runner.assert_content_equals("success", 1, CONTENT_2);
    runner.assert_content_equals("success", 2, CONTENT_3);

    // the uuid attribute is never taken from the caller
    for unit in runner.flow_units_for("success") {
        assert_eq!(unit.attribute("uuid"), Some(unit.uuid().to_string().as_str()));
    }
}

#[test]
fn test_failure() {
    let mut runner = runner_with_only(DebugFlow::FF_FAILURE_ITERATIONS);
    runner.assert_valid();
    enqueue_three(&runner);

    assert!(runner.run(4).unwrap().is_empty());
    runner.assert_transfer_count("success", 0);
    runner.assert_transfer_count("failure", 3);

    runner.assert_content_equals("failure", 0, CONTENT_1);
    runner.assert_content_equals("failure", 1, CONTENT_2);
    runner.assert_content_equals("failure", 2, CONTENT_3);
}

#[test]
fn test_success_and_failure() {
    let mut runner = runner();
    runner.set_property(DebugFlow::FF_FAILURE_ITERATIONS, "1");
    runner.assert_valid();
    enqueue_three(&runner);

    assert!(runner.run(4).unwrap().is_empty());
    runner.assert_transfer_count("success", 2);
    runner.assert_transfer_count("failure", 1);

    runner.assert_content_equals("success", 0, CONTENT_1);
    runner.assert_content_equals("success", 1, CONTENT_3);
    runner.assert_content_equals("failure", 0, CONTENT_2);
}

#[test]
fn test_yield() {
    let mut runner = runner_with_only(DebugFlow::FF_ROLLBACK_YIELD_ITERATIONS);
    runner.assert_valid();
    enqueue_three(&runner);

    assert!(runner.run(4).unwrap().is_empty());
    runner.assert_transfer_count("success", 0);
    runner.assert_transfer_count("failure", 0);
    assert_eq!(runner.queue_size(), 3);
    assert_head_unchanged(&runner);
}

#[test]
fn test_rollback() {
    let mut runner = runner_with_only(DebugFlow::FF_ROLLBACK_ITERATIONS);
    runner.assert_valid();
    enqueue_three(&runner);

    assert!(runner.run(4).unwrap().is_empty());
    runner.assert_transfer_count("success", 0);
    runner.assert_transfer_count("failure", 0);
    assert_eq!(runner.queue_size(), 3);
    assert_head_unchanged(&runner);
    let head = runner.peek_input().unwrap();
    assert_eq!(head.attribute("filename"), Some("testFile1.txt"));
    assert_eq!(head.penalty_count(), 0);
}

#[test]
fn test_rollback_with_penalty() {
    let mut runner = runner_with_only(DebugFlow::FF_ROLLBACK_PENALTY_ITERATIONS);
    runner.assert_valid();
    enqueue_three(&runner);

    assert!(runner.run(4).unwrap().is_empty());
    runner.assert_transfer_count("success", 0);
    assert_eq!(runner.queue_size(), 3);
    assert_head_unchanged(&runner);
    assert!(runner.peek_input().unwrap().is_penalized(Utc::now()));
}

#[test]
fn test_exception() {
    let mut runner = runner_with_only(DebugFlow::FF_EXCEPTION_ITERATIONS);
    runner.assert_valid();
    enqueue_three(&runner);

    // each unit fails once and is penalized; the fourth trigger finds nothing
    let failures = runner.run(4).unwrap();
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|f| f.process_error().is_some()));
    runner.assert_transfer_count("success", 0);
    runner.assert_transfer_count("failure", 0);
    assert_eq!(runner.queue_size(), 3);
    assert_head_unchanged(&runner);
}

#[test]
fn test_no_flow_unit_exception() {
    let mut runner = runner();
    runner.set_property(DebugFlow::NO_FF_SKIP_ITERATIONS, "0");
    runner.set_property(DebugFlow::NO_FF_EXCEPTION_ITERATIONS, "1");

    let failures = runner.run(3).unwrap();
    assert_eq!(failures.len(), 3);
}

#[test]
fn test_no_flow_unit_yield() {
    let mut runner = runner();
    runner.set_property(DebugFlow::NO_FF_YIELD_ITERATIONS, "1");

    // skip, yield, skip
    assert!(runner.run(3).unwrap().is_empty());
    assert_eq!(runner.queue_size(), 0);
}

#[test]
fn test_all_zero_flow_unit_iterations_rejected() {
    let mut runner = runner();
    runner.set_property(DebugFlow::FF_SUCCESS_ITERATIONS, "0");
    runner.assert_valid();
    assert!(runner.run(1).is_err());
}
