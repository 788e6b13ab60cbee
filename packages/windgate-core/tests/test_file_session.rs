//! Gate and abort tasks running on the file session provider.

mod common;

use common::{process, script, Harness};
use windgate_core::{
    AbortTask, FileSessionProvider, GateTask, ParameterList, RuntimeContext, SessionProvider,
};

#[tokio::test]
async fn test_gate_then_abort_with_file_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let directory = dir.path().to_str().unwrap().to_string();
    let harness = Harness::new();
    let pairs = [
        ("session", "file"),
        ("session.directory", directory.as_str()),
        ("resource.R", "mock"),
    ];
    let sessions = FileSessionProvider::new(dir.path());

    // leave the session open
    let gate = GateTask::new(
        harness.profile(&pairs),
        script(vec![process("P1", "R", "R")]),
        "s1",
        true,
        false,
        ParameterList::new(),
    )
    .unwrap()
    .with_runtime(RuntimeContext::default());
    gate.execute().await.unwrap();
    assert_eq!(sessions.created_ids().await.unwrap(), vec!["s1"]);

    // a second gate cannot create it again
    let again = GateTask::new(
        harness.profile(&pairs),
        script(Vec::new()),
        "s1",
        true,
        true,
        ParameterList::new(),
    )
    .unwrap()
    .with_runtime(RuntimeContext::default());
    assert!(again.execute().await.is_err());

    let abort = AbortTask::new(harness.profile(&pairs), None)
        .unwrap()
        .with_runtime(RuntimeContext::default());
    abort.execute().await.unwrap();

    assert!(harness.recorder.contains("R.abort(s1)"));
    assert!(sessions.created_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_gate_completes_file_session() {
    let dir = tempfile::tempdir().unwrap();
    let directory = dir.path().to_str().unwrap().to_string();
    let harness = Harness::new();
    let pairs = [
        ("core.maxProcesses", "2"),
        ("session", "file"),
        ("session.directory", directory.as_str()),
        ("resource.R", "mock"),
        ("process.plain", "plain"),
    ];
    let mut copy = process("P1", "R", "R");
    copy = windgate_core::ProcessScript::new(
        copy.name(),
        "plain",
        copy.data_class(),
        copy.source_script().clone(),
        copy.drain_script().clone(),
    );

    let gate = GateTask::new(
        harness.profile(&pairs),
        script(vec![copy]),
        "s1",
        true,
        true,
        ParameterList::new(),
    )
    .unwrap()
    .with_runtime(RuntimeContext::default());
    gate.execute().await.unwrap();

    assert_eq!(harness.recorder.records().len(), 2);
    assert!(FileSessionProvider::new(dir.path())
        .created_ids()
        .await
        .unwrap()
        .is_empty());
}
