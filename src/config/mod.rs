//! Configuration loading and parsing.
//!
//! This module provides YAML-based workspace settings and per-package build
//! files, and turns them into a [`TaskGraph`](crate::TaskGraph).

mod builder;
mod error;
mod types;
mod workspace;
mod yaml;

pub use builder::{RuleFactory, qualify, resolve_dep};
pub use error::ConfigError;
pub use types::{
    BuildFile, FilegroupConfig, ProcessConfig, RuleConfig, TaskConfig, WorkspaceConfig,
};
pub use workspace::{
    AGGREGATE_ID, BUILD_FILE, WORKSPACE_FILE, Workspace, find_workspace_root, load_workspace,
    package_name,
};
pub use yaml::YamlLoader;
