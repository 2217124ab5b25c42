//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskgraph::RuleId;
use taskgraph::output::{BufferSink, OutputFactory, Sink};
use tempfile::TempDir;

/// Output factory that keeps each rule's stdout in memory.
#[derive(Default)]
pub struct CaptureOutput {
    stdout: Mutex<HashMap<RuleId, Arc<BufferSink>>>,
}

impl CaptureOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything `id` has written to stdout so far.
    pub async fn stdout_of(&self, id: &str) -> String {
        let sink = self.stdout.lock().unwrap().get(id).cloned();
        match sink {
            Some(sink) => sink.contents_string().await,
            None => String::new(),
        }
    }
}

impl OutputFactory for CaptureOutput {
    fn stdout(&self, id: &RuleId) -> Sink {
        let sink = self
            .stdout
            .lock()
            .unwrap()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(BufferSink::new()))
            .clone();
        sink
    }

    fn stderr(&self, _id: &RuleId) -> Sink {
        Arc::new(BufferSink::new())
    }
}

/// Write `contents` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

/// A temporary workspace with the given build files, keyed by package
/// directory ("" for the root).
pub fn workspace(settings: &str, packages: &[(&str, &str)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_file(tmp.path(), "WORKSPACE.yaml", settings);
    for (dir, build) in packages {
        let relative = if dir.is_empty() {
            "BUILD.yaml".to_string()
        } else {
            format!("{dir}/BUILD.yaml")
        };
        write_file(tmp.path(), &relative, build);
    }
    tmp
}

/// Lines of a file, or nothing if it does not exist.
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Wait until `path` exists, polling every 10ms.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_file(path: &Path, timeout: Duration) {
    let start = tokio::time::Instant::now();
    while !path.exists() {
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {}", path.display());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
