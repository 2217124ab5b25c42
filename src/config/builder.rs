//! Turns build file entries into rules.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::ConfigError;
use super::types::{BuildFile, RuleConfig, WorkspaceConfig};
use crate::core::types::RuleId;
use crate::execution::ProcessSupervisor;
use crate::output::OutputFactory;
use crate::rules::{Checksum, Filegroup, FingerprintCache, ProcessRule, Rule, TaskRule};

/// Builds the rules of each package, wrapped for incremental skipping.
pub struct RuleFactory {
    config: WorkspaceConfig,
    cache: FingerprintCache,
    output: Arc<dyn OutputFactory>,
    supervisor: ProcessSupervisor,
}

impl RuleFactory {
    pub fn new(
        root: &Path,
        config: WorkspaceConfig,
        output: Arc<dyn OutputFactory>,
        supervisor: ProcessSupervisor,
    ) -> Self {
        let cache = FingerprintCache::new(root.join(&config.cache_dir));
        Self {
            config,
            cache,
            output,
            supervisor,
        }
    }

    pub fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    /// Build every rule of the package `package` defined in `dir`.
    pub fn build_package(
        &self,
        package: &str,
        dir: &Path,
        file: BuildFile,
    ) -> Result<Vec<Box<dyn Rule>>, ConfigError> {
        file.rules
            .into_iter()
            .map(|config| {
                let rule = self.build_rule(package, dir, config)?;
                let stdout = self.output.stdout(rule.id());
                Ok(Box::new(Checksum::new(rule, self.cache.clone(), stdout)) as Box<dyn Rule>)
            })
            .collect()
    }

    fn build_rule(
        &self,
        package: &str,
        dir: &Path,
        config: RuleConfig,
    ) -> Result<Box<dyn Rule>, ConfigError> {
        let id = qualify(package, config.name());
        let deps: Vec<RuleId> = config
            .deps()
            .iter()
            .map(|dep| resolve_dep(package, dep))
            .collect();
        let dir = PathBuf::from(dir);

        let rule: Box<dyn Rule> = match config {
            RuleConfig::Task(task) => Box::new(
                TaskRule::builder(id.clone(), dir)
                    .srcs(task.srcs)
                    .outs(task.outs)
                    .deps(deps)
                    .cmds(task.cmds)
                    .environment(self.config.environment.merged_with(&task.environment))
                    .stdout(self.output.stdout(&id))
                    .stderr(self.output.stderr(&id))
                    .kill_timeout(self.config.kill_timeout())
                    .build(),
            ),
            RuleConfig::Process(process) => Box::new(
                ProcessRule::builder(id.clone(), dir)
                    .deps(deps)
                    .cmds(process.cmds)
                    .ready(process.ready)
                    .environment(self.config.environment.merged_with(&process.environment))
                    .stdout(self.output.stdout(&id))
                    .stderr(self.output.stderr(&id))
                    .kill_timeout(self.config.kill_timeout())
                    .supervisor(self.supervisor.clone())
                    .build()
                    .map_err(|err| ConfigError::InvalidConfig(err.to_string()))?,
            ),
            RuleConfig::Filegroup(group) => {
                Box::new(Filegroup::new(id.clone(), dir).with_srcs(group.srcs))
            }
        };
        Ok(rule)
    }
}

/// The ID of rule `name` in `package`.
pub fn qualify(package: &str, name: &str) -> RuleId {
    RuleId::new(format!("{package}:{name}"))
}

/// Resolve a dependency as written in `package`'s build file.
///
/// `:name` is package-local; anything else is a full ID, with `//` added
/// when missing.
pub fn resolve_dep(package: &str, dep: &str) -> RuleId {
    if dep.starts_with(':') {
        RuleId::new(format!("{package}{dep}"))
    } else if dep.starts_with("//") {
        RuleId::new(dep)
    } else {
        RuleId::new(format!("//{dep}"))
    }
}
