//! Complete workflow integration tests.
//!
//! Tests that verify the full pipeline from build files to execution.

use crate::common::{CaptureOutput, read_lines, workspace};
use std::sync::Arc;
use taskgraph::{Engine, ProcessSupervisor, load_workspace};
use tokio_util::sync::CancellationToken;

fn task(name: &str, deps: &[&str], cmd: &str) -> String {
    let deps: Vec<String> = deps.iter().map(|d| format!("\"{d}\"")).collect();
    format!(
        "  - type: task\n    name: {name}\n    deps: [{}]\n    cmds: ['{cmd}']\n",
        deps.join(", ")
    )
}

#[tokio::test]
async fn test_diamond_runs_each_rule_once_in_dependency_order() {
    let tmp = tempfile::TempDir::new().unwrap();
    let log = tmp.path().join("order.log");
    let log = log.display();
    let lib = format!(
        "rules:\n{}{}{}",
        task("base", &[], &format!("echo base >> {log}")),
        task("a", &[":base"], &format!("echo a >> {log}")),
        task("b", &[":base"], &format!("echo b >> {log}")),
    );
    let root = format!(
        "rules:\n{}",
        task("app", &["//lib:a", "lib:b"], &format!("echo app >> {log}"))
    );
    let ws = workspace("", &[("", &root), ("lib", &lib)]);
    let supervisor = ProcessSupervisor::new(&CancellationToken::new());
    let workspace = load_workspace(ws.path(), CaptureOutput::new(), supervisor).unwrap();

    Engine::new(4)
        .execute(&CancellationToken::new(), workspace.graph(), "//:app")
        .await
        .unwrap();

    let lines = read_lines(&tmp.path().join("order.log"));
    assert_eq!(lines.len(), 4, "unexpected log: {:?}", lines);
    assert_eq!(lines[0], "base");
    assert_eq!(lines[3], "app");
    let mut middle = vec![lines[1].clone(), lines[2].clone()];
    middle.sort();
    assert_eq!(middle, vec!["a", "b"]);
}

#[tokio::test]
async fn test_failure_stops_dependents_and_reports_exit_code() {
    let tmp = tempfile::TempDir::new().unwrap();
    let marker = tmp.path().join("after.txt");
    let build = format!(
        "rules:\n{}{}",
        task("broken", &[], "exit 3"),
        task("after", &[":broken"], &format!("touch {}", marker.display())),
    );
    let ws = workspace("", &[("", &build)]);
    let supervisor = ProcessSupervisor::new(&CancellationToken::new());
    let workspace = load_workspace(ws.path(), CaptureOutput::new(), supervisor).unwrap();

    let err = Engine::new(2)
        .execute(&CancellationToken::new(), workspace.graph(), "//:after")
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(3));
    assert!(!err.is_cancelled());
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_unknown_target_is_missing_node() {
    let ws = workspace("", &[("", "rules: []\n")]);
    let supervisor = ProcessSupervisor::new(&CancellationToken::new());
    let workspace = load_workspace(ws.path(), CaptureOutput::new(), supervisor).unwrap();

    let err = Engine::new(1)
        .execute(&CancellationToken::new(), workspace.graph(), "//:nope")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("//:nope"), "{}", err);
}

#[tokio::test]
async fn test_aggregate_target_runs_every_rule_with_that_name() {
    let tmp = tempfile::TempDir::new().unwrap();
    let log = tmp.path().join("built.log");
    let entry = |pkg: &str| {
        format!(
            "rules:\n{}{}",
            task("build", &[], &format!("echo {pkg} >> {}", log.display())),
            task("test", &[], &format!("echo {pkg}-test >> {}", log.display())),
        )
    };
    let ws = workspace("", &[("web", &entry("web")), ("api", &entry("api"))]);
    let supervisor = ProcessSupervisor::new(&CancellationToken::new());
    let mut workspace = load_workspace(ws.path(), CaptureOutput::new(), supervisor).unwrap();
    let root = workspace.root().to_path_buf();

    let target = workspace.resolve_target(&root, ":build").unwrap();
    Engine::new(2)
        .execute(&CancellationToken::new(), workspace.graph(), target.as_str())
        .await
        .unwrap();

    let mut lines = read_lines(&log);
    lines.sort();
    assert_eq!(lines, vec!["api", "web"]);
}

#[tokio::test]
async fn test_tree_prints_dependencies() {
    let build = format!(
        "rules:\n{}{}{}",
        task("lib", &[], "true"),
        task("bin", &[":lib"], "true"),
        task("all", &[":bin", ":lib"], "true"),
    );
    let ws = workspace("", &[("", &build)]);
    let supervisor = ProcessSupervisor::new(&CancellationToken::new());
    let workspace = load_workspace(ws.path(), Arc::new(taskgraph::output::NullOutput), supervisor)
        .unwrap();

    let mut out = Vec::new();
    Engine::new(1)
        .tree(workspace.graph(), "//:all", &mut out)
        .unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "//:all\n├── //:bin\n│   └── //:lib\n└── //:lib\n"
    );
}

#[tokio::test]
async fn test_command_output_reaches_rule_sink() {
    let ws = workspace("", &[("", &format!("rules:\n{}", task("hello", &[], "echo hello")))]);
    let output = CaptureOutput::new();
    let supervisor = ProcessSupervisor::new(&CancellationToken::new());
    let workspace = load_workspace(ws.path(), output.clone(), supervisor).unwrap();

    Engine::new(1)
        .execute(&CancellationToken::new(), workspace.graph(), "//:hello")
        .await
        .unwrap();

    assert_eq!(output.stdout_of("//:hello").await, "hello\n");
}
