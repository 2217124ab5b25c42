//! taskgraph - run interdependent build rules concurrently.
//!
//! Rules are loaded from `BUILD.yaml` files across a workspace into a
//! [`TaskGraph`]. The [`Engine`] turns that graph into an
//! [`ExecutionGraph`] and runs a target: every rule executes at most once
//! per run, after its dependencies, with bounded concurrency. Long-running
//! processes started by [`ProcessRule`]s stay under a [`ProcessSupervisor`]
//! until the run is cancelled.

pub mod config;
pub mod core;
pub mod error;
pub mod execution;
pub mod output;
pub mod rules;
pub mod signals;

pub use config::{ConfigError, Workspace, WorkspaceConfig, YamlLoader, load_workspace};
pub use core::environment::Environment;
pub use core::future::Promise;
pub use core::task_graph::{GraphError, TaskGraph};
pub use core::types::{RuleId, RunId};
pub use error::Error;
pub use execution::{Engine, ExecError, ExecutionGraph, ProcessSupervisor, RunOptions};
pub use output::{OutputFactory, OutputSink, Sink};
pub use rules::{Checksum, Filegroup, ProcessRule, Rule, TaskRule};
