//! Rules that run shell commands.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::Rule;
use crate::core::environment::Environment;
use crate::core::types::RuleId;
use crate::error::Error;
use crate::execution::{DEFAULT_KILL_TIMEOUT, RunOptions, run_commands};
use crate::output::{NullSink, Sink};

/// A rule that runs its command lines in order.
///
/// # Example
///
/// ```ignore
/// let task = TaskRule::builder("//app:build", "/src/app")
///     .srcs(["src/**/*.rs", "Cargo.toml"])
///     .outs(["target/release/app"])
///     .dep("//lib:build")
///     .cmd("cargo build --release")
///     .build();
/// ```
#[derive(Clone)]
pub struct TaskRule {
    id: RuleId,
    srcs: Vec<String>,
    outs: Vec<String>,
    deps: Vec<RuleId>,
    cmds: Vec<String>,
    dir: PathBuf,
    environment: Environment,
    stdout: Sink,
    stderr: Sink,
    kill_timeout: Duration,
}

impl TaskRule {
    /// Create a new builder for a task rule.
    pub fn builder(id: impl Into<RuleId>, dir: impl Into<PathBuf>) -> TaskRuleBuilder {
        TaskRuleBuilder::new(id, dir)
    }

    /// The command lines, in execution order.
    pub fn cmds(&self) -> &[String] {
        &self.cmds
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    fn run_options(&self) -> RunOptions {
        RunOptions::new(&self.dir)
            .with_env(self.environment.clone())
            .with_stdout(Arc::clone(&self.stdout))
            .with_stderr(Arc::clone(&self.stderr))
            .with_kill_timeout(self.kill_timeout)
    }
}

impl std::fmt::Debug for TaskRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRule")
            .field("id", &self.id)
            .field("cmds", &self.cmds)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Rule for TaskRule {
    fn id(&self) -> &RuleId {
        &self.id
    }

    fn inputs(&self) -> &[String] {
        &self.srcs
    }

    fn outputs(&self) -> &[String] {
        &self.outs
    }

    fn dependencies(&self) -> &[RuleId] {
        &self.deps
    }

    fn working_dir(&self) -> &Path {
        &self.dir
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), Error> {
        run_commands(cancel, &self.cmds, &self.run_options()).await?;
        Ok(())
    }
}

/// Builder for creating `TaskRule` instances.
#[derive(Clone)]
pub struct TaskRuleBuilder {
    rule: TaskRule,
}

impl TaskRuleBuilder {
    pub fn new(id: impl Into<RuleId>, dir: impl Into<PathBuf>) -> Self {
        Self {
            rule: TaskRule {
                id: id.into(),
                srcs: Vec::new(),
                outs: Vec::new(),
                deps: Vec::new(),
                cmds: Vec::new(),
                dir: dir.into(),
                environment: Environment::default(),
                stdout: Arc::new(NullSink),
                stderr: Arc::new(NullSink),
                kill_timeout: DEFAULT_KILL_TIMEOUT,
            },
        }
    }

    /// Set the input patterns.
    pub fn srcs<I, S>(mut self, srcs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rule.srcs = srcs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the declared outputs.
    pub fn outs<I, S>(mut self, outs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rule.outs = outs.into_iter().map(Into::into).collect();
        self
    }

    /// Add a dependency.
    pub fn dep(mut self, id: impl Into<RuleId>) -> Self {
        self.rule.deps.push(id.into());
        self
    }

    /// Add several dependencies.
    pub fn deps<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RuleId>,
    {
        self.rule.deps.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Add a command line.
    pub fn cmd(mut self, line: impl Into<String>) -> Self {
        self.rule.cmds.push(line.into());
        self
    }

    /// Add several command lines.
    pub fn cmds<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rule.cmds.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Set environment variables.
    pub fn environment(mut self, env: Environment) -> Self {
        self.rule.environment = env;
        self
    }

    /// Add a single environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.rule.environment.set(key, value);
        self
    }

    pub fn stdout(mut self, sink: Sink) -> Self {
        self.rule.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: Sink) -> Self {
        self.rule.stderr = sink;
        self
    }

    /// Set the grace period given to commands on cancellation.
    pub fn kill_timeout(mut self, timeout: Duration) -> Self {
        self.rule.kill_timeout = timeout;
        self
    }

    /// Build the `TaskRule`.
    pub fn build(self) -> TaskRule {
        self.rule
    }
}
