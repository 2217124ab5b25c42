//! Background process and cancellation integration tests.
//!
//! Tests that processes stay up after becoming ready, that cancellation
//! stops them within the grace period, and that failures surface.

use crate::common::{CaptureOutput, wait_for_file, workspace};
use std::time::Duration;
use taskgraph::{Engine, Error, ProcessSupervisor, load_workspace};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const SETTINGS: &str = "kill_timeout_ms: 200\n";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dependents_run_once_process_is_ready() {
    let tmp = tempfile::TempDir::new().unwrap();
    let marker = tmp.path().join("client.txt");
    let build = format!(
        r#"rules:
  - type: process
    name: serve
    cmds: ["echo starting; echo listening; exec sleep 30"]
    ready: listening
  - type: task
    name: client
    deps: [":serve"]
    cmds: ["touch {}"]
"#,
        marker.display()
    );
    let ws = workspace(SETTINGS, &[("", &build)]);
    let cancel = CancellationToken::new();
    let supervisor = ProcessSupervisor::new(&cancel);
    let output = CaptureOutput::new();
    let workspace = load_workspace(ws.path(), output.clone(), supervisor.clone()).unwrap();

    timeout(
        Duration::from_secs(10),
        Engine::new(2).execute(&cancel, workspace.graph(), "//:client"),
    )
    .await
    .expect("run timed out")
    .unwrap();

    assert!(marker.exists());
    assert!(!supervisor.is_cancelled());
    assert!(output.stdout_of("//:serve").await.contains("listening"));

    cancel.cancel();
    timeout(Duration::from_secs(5), supervisor.wait())
        .await
        .expect("process did not stop")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_process_exiting_before_ready_fails_run() {
    let build = r#"rules:
  - type: process
    name: serve
    cmds: ["echo crashed"]
    ready: listening
"#;
    let ws = workspace(SETTINGS, &[("", build)]);
    let cancel = CancellationToken::new();
    let supervisor = ProcessSupervisor::new(&cancel);
    let workspace =
        load_workspace(ws.path(), CaptureOutput::new(), supervisor.clone()).unwrap();

    let err = Engine::new(1)
        .execute(&cancel, workspace.graph(), "//:serve")
        .await
        .unwrap_err();

    assert!(!err.is_cancelled());
    assert!(err.to_string().contains("//:serve"), "{}", err);
    supervisor.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_process_failing_after_ready_is_reported_by_supervisor() {
    let build = r#"rules:
  - type: process
    name: flaky
    cmds: ["echo listening; exit 4"]
    ready: listening
"#;
    let ws = workspace(SETTINGS, &[("", build)]);
    let cancel = CancellationToken::new();
    let supervisor = ProcessSupervisor::new(&cancel);
    let workspace =
        load_workspace(ws.path(), CaptureOutput::new(), supervisor.clone()).unwrap();

    Engine::new(1)
        .execute(&cancel, workspace.graph(), "//:flaky")
        .await
        .unwrap();
    let err: Error = timeout(Duration::from_secs(5), supervisor.wait())
        .await
        .expect("supervisor did not finish")
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(4));
    assert!(supervisor.is_cancelled());
    assert!(!cancel.is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_stops_running_task() {
    let tmp = tempfile::TempDir::new().unwrap();
    let started = tmp.path().join("started");
    let build = format!(
        "rules:\n  - type: task\n    name: slow\n    cmds: [\"touch {}\", \"sleep 30\"]\n",
        started.display()
    );
    let ws = workspace(SETTINGS, &[("", &build)]);
    let cancel = CancellationToken::new();
    let supervisor = ProcessSupervisor::new(&cancel);
    let workspace = load_workspace(ws.path(), CaptureOutput::new(), supervisor).unwrap();

    let trigger = cancel.clone();
    let watched = started.clone();
    tokio::spawn(async move {
        wait_for_file(&watched, Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let err = timeout(
        Duration::from_secs(5),
        Engine::new(1).execute(&cancel, workspace.graph(), "//:slow"),
    )
    .await
    .expect("cancellation did not stop the task")
    .unwrap_err();

    assert!(err.is_cancelled(), "{}", err);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_before_start_runs_nothing() {
    let tmp = tempfile::TempDir::new().unwrap();
    let marker = tmp.path().join("ran");
    let build = format!(
        "rules:\n  - type: task\n    name: noop\n    cmds: [\"touch {}\"]\n",
        marker.display()
    );
    let ws = workspace(SETTINGS, &[("", &build)]);
    let cancel = CancellationToken::new();
    let supervisor = ProcessSupervisor::new(&cancel);
    let workspace = load_workspace(ws.path(), CaptureOutput::new(), supervisor).unwrap();
    cancel.cancel();

    let err = Engine::new(1)
        .execute(&cancel, workspace.graph(), "//:noop")
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(!marker.exists());
}
