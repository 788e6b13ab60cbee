//! Integration tests for AbortTask
//!
//! - aborting a missing session is a no-op
//! - every resource is attempted even if one fails
//! - bulk abort keeps going across sessions

mod common;

use common::Harness;
use windgate_core::{AbortTask, GateError, RuntimeContext};

fn abort_task(harness: &Harness, pairs: &[(&str, &str)], session_id: Option<&str>) -> AbortTask {
    AbortTask::new(harness.profile(pairs), session_id.map(str::to_string))
        .unwrap()
        .with_runtime(RuntimeContext::default())
}

const RESOURCES: &[(&str, &str)] = &[
    ("resource.A", "mock"),
    ("resource.B", "mock"),
    ("resource.C", "mock"),
];

#[tokio::test]
async fn test_abort_missing_session_is_noop() {
    let harness = Harness::new();
    let task = abort_task(&harness, RESOURCES, None);

    assert!(!task.abort_session("missing").await.unwrap());
    assert!(!harness.recorder.contains("A.abort(missing)"));
}

#[tokio::test]
async fn test_abort_twice() {
    let harness = Harness::new();
    harness.sessions.add("s1");
    let task = abort_task(&harness, RESOURCES, Some("s1"));

    assert!(task.abort_session("s1").await.unwrap());
    assert!(!harness.sessions.exists("s1"));
    assert!(!task.abort_session("s1").await.unwrap());
    task.execute().await.unwrap();

    let r = &harness.recorder;
    for event in ["A.abort(s1)", "B.abort(s1)", "C.abort(s1)", "session.abort(s1)"] {
        assert_eq!(r.count(event), 1, "{}", event);
    }
    assert_eq!(r.count("session.close"), 1);
}

#[tokio::test]
async fn test_abort_is_best_effort_across_resources() {
    let harness = Harness::new();
    harness.sessions.add("s1");
    let mut pairs = RESOURCES.to_vec();
    pairs.push(("resource.B.failAbort", "s1"));
    let task = abort_task(&harness, &pairs, Some("s1"));

    let result = task.execute().await;

    match result {
        Err(GateError::Abort {
            session_id,
            failures,
        }) => {
            assert_eq!(session_id, "s1");
            assert_eq!(failures, 1);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    let r = &harness.recorder;
    for event in ["A.abort(s1)", "B.abort(s1)", "C.abort(s1)"] {
        assert_eq!(r.count(event), 1, "{}", event);
    }
    assert!(!r.contains("session.abort(s1)"));
    assert!(r.contains("session.close"));
    assert!(harness.sessions.exists("s1"));
}

#[tokio::test]
async fn test_bulk_abort_keeps_going() {
    let harness = Harness::new();
    for id in ["s1", "s2", "s3"] {
        harness.sessions.add(id);
    }
    let mut pairs = RESOURCES.to_vec();
    pairs.push(("resource.B.failAbort", "s2"));
    let task = abort_task(&harness, &pairs, None);

    let result = task.execute().await;

    assert!(matches!(result, Err(GateError::Abort { failures: 1, .. })));
    let r = &harness.recorder;
    for id in ["s1", "s2", "s3"] {
        assert!(r.contains(&format!("A.abort({})", id)));
        assert!(r.contains(&format!("C.abort({})", id)));
    }
    assert!(r.position("session.abort(s1)") < r.position("A.abort(s3)"));
    assert!(!harness.sessions.exists("s1"));
    assert!(harness.sessions.exists("s2"));
    assert!(!harness.sessions.exists("s3"));
}

#[tokio::test]
async fn test_bulk_abort_without_sessions() {
    let harness = Harness::new();
    let task = abort_task(&harness, RESOURCES, None);

    task.execute().await.unwrap();
    assert!(harness.recorder.events().is_empty());
}

#[tokio::test]
async fn test_simulation_skips_abort() {
    let harness = Harness::new();
    harness.sessions.add("s1");
    let task = abort_task(&harness, RESOURCES, None).with_runtime(RuntimeContext::simulation());

    task.execute().await.unwrap();

    assert!(harness.recorder.events().is_empty());
    assert!(harness.sessions.exists("s1"));

    // a named session is "aborted" without touching any provider
    assert!(task.abort_session("s1").await.unwrap());
    assert!(harness.recorder.events().is_empty());
}
