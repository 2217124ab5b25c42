//! Configuration type definitions.
//!
//! This module contains the structures of `WORKSPACE.yaml` and `BUILD.yaml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::environment::Environment;
use crate::execution::DEFAULT_KILL_TIMEOUT;
use crate::rules::DEFAULT_CACHE_DIR;

/// Workspace-wide settings (`WORKSPACE.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Grace period between SIGINT and SIGKILL, in milliseconds.
    pub kill_timeout_ms: u64,
    /// Maximum number of rules executing at once.
    pub max_concurrency: Option<usize>,
    /// Fingerprint cache directory, relative to the workspace root.
    pub cache_dir: PathBuf,
    /// Variables added to every rule's environment.
    pub environment: Environment,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            kill_timeout_ms: DEFAULT_KILL_TIMEOUT.as_millis() as u64,
            max_concurrency: None,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            environment: Environment::default(),
        }
    }
}

impl WorkspaceConfig {
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    /// The configured concurrency, or the available parallelism.
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        })
    }
}

/// The rules of one package (`BUILD.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildFile {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// A rule definition, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleConfig {
    /// Shell commands run in order.
    Task(TaskConfig),
    /// A long-running background process.
    Process(ProcessConfig),
    /// A named set of files.
    Filegroup(FilegroupConfig),
}

impl RuleConfig {
    pub fn name(&self) -> &str {
        match self {
            RuleConfig::Task(task) => &task.name,
            RuleConfig::Process(process) => &process.name,
            RuleConfig::Filegroup(group) => &group.name,
        }
    }

    pub fn deps(&self) -> &[String] {
        match self {
            RuleConfig::Task(task) => &task.deps,
            RuleConfig::Process(process) => &process.deps,
            RuleConfig::Filegroup(_) => &[],
        }
    }
}

/// Task rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    /// Input glob patterns, relative to the package directory.
    #[serde(default)]
    pub srcs: Vec<String>,
    #[serde(default)]
    pub outs: Vec<String>,
    /// Dependencies; `:name` refers to a rule in the same package.
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub cmds: Vec<String>,
    #[serde(default)]
    pub environment: Environment,
}

/// Process rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    #[serde(default)]
    pub deps: Vec<String>,
    pub cmds: Vec<String>,
    /// Text on stdout that marks the process ready.
    #[serde(default)]
    pub ready: String,
    #[serde(default)]
    pub environment: Environment,
}

/// Filegroup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilegroupConfig {
    pub name: String,
    #[serde(default)]
    pub srcs: Vec<String>,
}
