//! Execution infrastructure.
//!
//! This module runs commands, schedules rules over the dependency graph and
//! keeps background processes alive until the run ends.

mod command;
mod engine;
mod exec_graph;
mod supervisor;

pub use command::{
    DEFAULT_KILL_TIMEOUT, EXIT_NOT_FOUND, ExecError, RunOptions, run_command, run_commands,
};
pub use engine::Engine;
pub use exec_graph::{Callback, ExecutionGraph, NodeResult};
pub use supervisor::ProcessSupervisor;
