//! Workspace discovery and loading.
//!
//! A workspace is the directory holding `WORKSPACE.yaml`. Every `BUILD.yaml`
//! below it defines a package named after its directory relative to the
//! root: `//` for the root itself, `//web/app` for `web/app/BUILD.yaml`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::builder::RuleFactory;
use super::error::ConfigError;
use super::types::WorkspaceConfig;
use super::yaml::YamlLoader;
use crate::core::task_graph::TaskGraph;
use crate::core::types::RuleId;
use crate::error::Error;
use crate::execution::ProcessSupervisor;
use crate::output::OutputFactory;
use crate::rules::Rule;

pub const WORKSPACE_FILE: &str = "WORKSPACE.yaml";
pub const BUILD_FILE: &str = "BUILD.yaml";

/// ID of the synthetic rule created for a `:name` target.
pub const AGGREGATE_ID: &str = "//-";

/// Find the nearest directory, starting at `start` and walking up, that
/// holds a workspace file.
pub fn find_workspace_root(start: &Path) -> Result<PathBuf, ConfigError> {
    let start = start
        .canonicalize()
        .map_err(|source| ConfigError::FileReadError {
            path: start.to_path_buf(),
            source,
        })?;
    let root = start
        .ancestors()
        .find(|dir| dir.join(WORKSPACE_FILE).is_file())
        .map(Path::to_path_buf);
    root.ok_or(ConfigError::WorkspaceNotFound(start))
}

/// Package name of `dir` within the workspace at `root`.
///
/// Directories outside the workspace map to the root package.
pub fn package_name(root: &Path, dir: &Path) -> String {
    let relative = dir.strip_prefix(root).unwrap_or(Path::new(""));
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("//{}", parts.join("/"))
}

/// A loaded workspace: its settings and every rule of every package.
pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
    graph: TaskGraph,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Resolve a target as typed on the command line into a rule ID.
    ///
    /// - `.:name` is the rule `name` in the package of `cwd`.
    /// - `:name` is a synthetic rule, added to the graph, that depends on
    ///   every rule called `name` in any package.
    /// - anything else is a rule ID, with `//` prepended when missing.
    pub fn resolve_target(&mut self, cwd: &Path, target: &str) -> Result<RuleId, ConfigError> {
        if let Some(name) = target.strip_prefix(".:") {
            let package = package_name(&self.root, cwd);
            return Ok(super::builder::qualify(&package, name));
        }

        if let Some(name) = target.strip_prefix(':') {
            let deps: Vec<RuleId> = self
                .graph
                .rule_ids()
                .into_iter()
                .filter(|id| id.as_str() != AGGREGATE_ID && id.name() == name)
                .collect();
            if deps.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "no rule named '{name}' in any package"
                )));
            }
            debug!(name, matches = deps.len(), "aggregating target");
            let aggregate = Aggregate {
                id: RuleId::new(AGGREGATE_ID),
                dir: self.root.clone(),
                deps,
            };
            self.graph
                .add_rule_with_dependencies(Arc::new(aggregate))
                .map_err(|err| ConfigError::InvalidConfig(err.to_string()))?;
            return Ok(RuleId::new(AGGREGATE_ID));
        }

        if target.starts_with("//") {
            Ok(RuleId::new(target))
        } else {
            Ok(RuleId::new(format!("//{target}")))
        }
    }
}

/// Load the workspace enclosing `start`.
pub fn load_workspace(
    start: &Path,
    output: Arc<dyn OutputFactory>,
    supervisor: ProcessSupervisor,
) -> Result<Workspace, ConfigError> {
    let root = find_workspace_root(start)?;
    let config = YamlLoader::load_workspace_config(root.join(WORKSPACE_FILE))?;
    let factory = RuleFactory::new(&root, config.clone(), output, supervisor);

    let mut graph = TaskGraph::new();
    let walker = WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

    let mut packages = 0;
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.file_name() != BUILD_FILE {
            continue;
        }
        let dir = entry.path().parent().unwrap_or(&root);
        let package = package_name(&root, dir);
        let file = YamlLoader::load_build_file(entry.path())?;

        for rule in factory.build_package(&package, dir, file)? {
            graph
                .add_rule_with_dependencies(Arc::from(rule))
                .map_err(|err| ConfigError::InvalidConfig(err.to_string()))?;
        }
        packages += 1;
    }

    info!(root = %root.display(), packages, rules = graph.len(), "loaded workspace");
    Ok(Workspace {
        root,
        config,
        graph,
    })
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// No-op rule standing in for a `:name` target.
struct Aggregate {
    id: RuleId,
    dir: PathBuf,
    deps: Vec<RuleId>,
}

#[async_trait]
impl Rule for Aggregate {
    fn id(&self) -> &RuleId {
        &self.id
    }

    fn dependencies(&self) -> &[RuleId] {
        &self.deps
    }

    fn working_dir(&self) -> &Path {
        &self.dir
    }

    async fn execute(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        Ok(())
    }
}
