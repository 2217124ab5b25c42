//! Incremental execution integration tests.
//!
//! Tests that rules with unchanged inputs are skipped on later runs.

use crate::common::{CaptureOutput, read_lines, workspace, write_file};
use std::path::Path;
use taskgraph::{Engine, Error, ProcessSupervisor, load_workspace};
use tokio_util::sync::CancellationToken;

/// Load the workspace fresh and run `target` once.
async fn run_once(root: &Path, target: &str) -> (Result<(), Error>, String) {
    let output = CaptureOutput::new();
    let supervisor = ProcessSupervisor::new(&CancellationToken::new());
    let workspace = load_workspace(root, output.clone(), supervisor).unwrap();
    let result = Engine::new(2)
        .execute(&CancellationToken::new(), workspace.graph(), target)
        .await;
    let stdout = output.stdout_of(target).await;
    (result, stdout)
}

#[tokio::test]
async fn test_unchanged_inputs_are_skipped() {
    let tmp = tempfile::TempDir::new().unwrap();
    let log = tmp.path().join("runs.log");
    let build = format!(
        "rules:\n  - type: task\n    name: gen\n    srcs: [\"src/*.txt\"]\n    cmds: ['echo run >> {}']\n",
        log.display()
    );
    let ws = workspace("", &[("", &build)]);
    write_file(ws.path(), "src/a.txt", "one");

    let (first, stdout) = run_once(ws.path(), "//:gen").await;
    first.unwrap();
    assert_eq!(read_lines(&log).len(), 1);
    assert!(!stdout.contains("up-to-date"));
    let cache_file = ws.path().join(".taskgraph").join(":gen");
    let recorded = std::fs::read_to_string(&cache_file).unwrap();
    assert_eq!(recorded.len(), 8);

    let (second, stdout) = run_once(ws.path(), "//:gen").await;
    second.unwrap();
    assert_eq!(read_lines(&log).len(), 1);
    assert_eq!(stdout, "//:gen is up-to-date\n");
    assert_eq!(std::fs::read_to_string(&cache_file).unwrap(), recorded);

    write_file(ws.path(), "src/a.txt", "two");
    let (third, _) = run_once(ws.path(), "//:gen").await;
    third.unwrap();
    assert_eq!(read_lines(&log).len(), 2);
    assert_ne!(std::fs::read_to_string(&cache_file).unwrap(), recorded);
}

#[tokio::test]
async fn test_new_input_file_triggers_rerun() {
    let tmp = tempfile::TempDir::new().unwrap();
    let log = tmp.path().join("runs.log");
    let build = format!(
        "rules:\n  - type: task\n    name: gen\n    srcs: [\"src/*.txt\"]\n    cmds: ['echo run >> {}']\n",
        log.display()
    );
    let ws = workspace("", &[("", &build)]);
    write_file(ws.path(), "src/a.txt", "one");

    run_once(ws.path(), "//:gen").await.0.unwrap();
    write_file(ws.path(), "src/b.txt", "");
    run_once(ws.path(), "//:gen").await.0.unwrap();

    assert_eq!(read_lines(&log).len(), 2);
}

#[tokio::test]
async fn test_failed_rule_is_not_recorded() {
    let build = "rules:\n  - type: task\n    name: fail\n    srcs: [\"*.txt\"]\n    cmds: [\"exit 1\"]\n";
    let ws = workspace("", &[("", build)]);
    write_file(ws.path(), "input.txt", "data");

    let (result, _) = run_once(ws.path(), "//:fail").await;

    assert_eq!(result.unwrap_err().exit_code(), Some(1));
    assert!(!ws.path().join(".taskgraph").join(":fail").exists());

    let (again, _) = run_once(ws.path(), "//:fail").await;
    assert!(again.is_err());
}

#[tokio::test]
async fn test_custom_cache_dir() {
    let build = "rules:\n  - type: task\n    name: gen\n    srcs: [\"*.txt\"]\n    cmds: [\"true\"]\n";
    let ws = workspace("cache_dir: build/cache\n", &[("", build)]);
    write_file(ws.path(), "input.txt", "data");

    run_once(ws.path(), "//:gen").await.0.unwrap();

    assert!(ws.path().join("build/cache/:gen").is_file());
    assert!(!ws.path().join(".taskgraph").exists());
}
