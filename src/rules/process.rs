//! Rules that start long-running background processes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Rule;
use super::readiness::wait_for_text;
use crate::core::environment::Environment;
use crate::core::types::RuleId;
use crate::error::Error;
use crate::execution::{DEFAULT_KILL_TIMEOUT, ProcessSupervisor, RunOptions, run_commands};
use crate::output::{NullSink, Sink, WriterSink};

/// Buffer size of the pipe between a process and its readiness scanner.
const PIPE_CAPACITY: usize = 64 * 1024;

/// A rule that starts a process and returns once it is ready.
///
/// The process keeps running under the [`ProcessSupervisor`] after
/// `execute` returns. Readiness means `ready` has appeared in its stdout, or
/// immediately when `ready` is empty.
#[derive(Clone)]
pub struct ProcessRule {
    id: RuleId,
    deps: Vec<RuleId>,
    cmds: Vec<String>,
    ready: String,
    dir: PathBuf,
    environment: Environment,
    stdout: Sink,
    stderr: Sink,
    kill_timeout: Duration,
    supervisor: ProcessSupervisor,
}

impl ProcessRule {
    /// Create a new builder for a process rule.
    pub fn builder(id: impl Into<RuleId>, dir: impl Into<PathBuf>) -> ProcessRuleBuilder {
        ProcessRuleBuilder::new(id, dir)
    }

    /// The readiness marker.
    pub fn ready_marker(&self) -> &str {
        &self.ready
    }

    pub fn cmds(&self) -> &[String] {
        &self.cmds
    }
}

impl std::fmt::Debug for ProcessRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRule")
            .field("id", &self.id)
            .field("cmds", &self.cmds)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Rule for ProcessRule {
    fn id(&self) -> &RuleId {
        &self.id
    }

    fn dependencies(&self) -> &[RuleId] {
        &self.deps
    }

    fn working_dir(&self) -> &Path {
        &self.dir
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let (ready_tx, ready_rx) = oneshot::channel::<bool>();
        let cmds = self.cmds.clone();
        let marker = self.ready.clone();
        let tee = Arc::clone(&self.stdout);
        let base = RunOptions::new(&self.dir)
            .with_env(self.environment.clone())
            .with_stderr(Arc::clone(&self.stderr))
            .with_kill_timeout(self.kill_timeout);
        let id = self.id.clone();

        self.supervisor.start(move |token| async move {
            let (pipe_in, pipe_out) = tokio::io::duplex(PIPE_CAPACITY);
            let readiness = wait_for_text(pipe_out, marker, tee);
            tokio::spawn(async move {
                let ready = readiness.await.unwrap_or(false);
                let _ = ready_tx.send(ready);
            });

            let opts = base.with_stdout(Arc::new(WriterSink::new(pipe_in)));
            let result = run_commands(&token, &cmds, &opts).await;
            // closes the pipe so the scanner sees the end of the stream
            drop(opts);
            debug!(rule = %id, ?result, "process exited");
            result.map_err(Error::from)
        });

        tokio::select! {
            ready = ready_rx => match ready {
                Ok(true) => {
                    info!(rule = %self.id, "process ready");
                    Ok(())
                }
                _ => Err(Error::NotReady(self.id.clone())),
            },
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

/// Builder for creating `ProcessRule` instances.
#[derive(Clone)]
pub struct ProcessRuleBuilder {
    id: RuleId,
    deps: Vec<RuleId>,
    cmds: Vec<String>,
    ready: String,
    dir: PathBuf,
    environment: Environment,
    stdout: Sink,
    stderr: Sink,
    kill_timeout: Duration,
    supervisor: Option<ProcessSupervisor>,
}

impl ProcessRuleBuilder {
    pub fn new(id: impl Into<RuleId>, dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            deps: Vec::new(),
            cmds: Vec::new(),
            ready: String::new(),
            dir: dir.into(),
            environment: Environment::default(),
            stdout: Arc::new(NullSink),
            stderr: Arc::new(NullSink),
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            supervisor: None,
        }
    }

    pub fn dep(mut self, id: impl Into<RuleId>) -> Self {
        self.deps.push(id.into());
        self
    }

    pub fn deps<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RuleId>,
    {
        self.deps.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn cmd(mut self, line: impl Into<String>) -> Self {
        self.cmds.push(line.into());
        self
    }

    pub fn cmds<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmds.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Set the text that signals readiness on stdout.
    pub fn ready(mut self, marker: impl Into<String>) -> Self {
        self.ready = marker.into();
        self
    }

    pub fn environment(mut self, env: Environment) -> Self {
        self.environment = env;
        self
    }

    pub fn stdout(mut self, sink: Sink) -> Self {
        self.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: Sink) -> Self {
        self.stderr = sink;
        self
    }

    pub fn kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Set the supervisor the process runs under. Required.
    pub fn supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Build the `ProcessRule`.
    pub fn build(self) -> Result<ProcessRule, Error> {
        let supervisor = self
            .supervisor
            .ok_or_else(|| Error::MissingSupervisor(self.id.clone()))?;
        Ok(ProcessRule {
            id: self.id,
            deps: self.deps,
            cmds: self.cmds,
            ready: self.ready,
            dir: self.dir,
            environment: self.environment,
            stdout: self.stdout,
            stderr: self.stderr,
            kill_timeout: self.kill_timeout,
            supervisor,
        })
    }
}
