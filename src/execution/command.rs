//! Shell command execution.
//!
//! [`run_command`] runs one command line to completion. Simple command lines
//! (a program and its arguments, with POSIX quoting) are executed directly;
//! anything using shell syntax such as pipes, redirections, expansions or
//! builtins is handed to `sh -e -c`.
//!
//! # Cancellation
//!
//! Every child is started in its own process group. When the cancellation
//! token fires, the group receives SIGINT; if it is still alive once the
//! kill timeout has elapsed it receives SIGKILL. Background processes left
//! in the group that keep the output pipes open are stopped the same way.
//! A cancelled command returns [`ExecError::Cancelled`].
//!
//! # Exit codes
//!
//! - nonzero exit: [`ExecError::Exit`] with that code
//! - killed by a signal: `128 + signal`
//! - program not found or not startable: `127`, with a message written to
//!   the stderr sink
//!
//! ```rust,no_run
//! use taskgraph::execution::{RunOptions, run_commands};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), taskgraph::execution::ExecError> {
//! let cancel = CancellationToken::new();
//! let opts = RunOptions::new("/tmp");
//! run_commands(&cancel, &["mkdir -p out", "echo done > out/status"], &opts).await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::environment::Environment;
use crate::output::{NullSink, Sink};

/// Grace period between SIGINT and SIGKILL.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Exit code reported when a program cannot be found or started.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Errors from running a command line.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command line is not valid shell syntax.
    #[error("failed to parse command: {0}")]
    Parse(String),

    /// The command ran and failed.
    #[error("command exited with code {code}")]
    Exit { code: i32 },

    /// The command was stopped because the run was cancelled.
    #[error("command cancelled")]
    Cancelled,

    /// Waiting for the child or moving its output failed.
    #[error("command I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl ExecError {
    /// The exit code, for failures that have one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::Exit { code } => Some(*code),
            _ => None,
        }
    }
}

/// Where and how a command runs.
#[derive(Clone)]
pub struct RunOptions {
    dir: PathBuf,
    env: Environment,
    stdout: Sink,
    stderr: Sink,
    kill_timeout: Duration,
}

impl RunOptions {
    /// Options for running in `dir` with output discarded.
    ///
    /// `dir` does not have to exist yet; it is checked when a process is
    /// started.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            env: Environment::default(),
            stdout: Arc::new(NullSink),
            stderr: Arc::new(NullSink),
            kill_timeout: DEFAULT_KILL_TIMEOUT,
        }
    }

    /// Set the environment overlay.
    pub fn with_env(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    /// Set the stdout sink.
    pub fn with_stdout(mut self, sink: Sink) -> Self {
        self.stdout = sink;
        self
    }

    /// Set the stderr sink.
    pub fn with_stderr(mut self, sink: Sink) -> Self {
        self.stderr = sink;
        self
    }

    /// Set the grace period between SIGINT and SIGKILL.
    pub fn with_kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn kill_timeout(&self) -> Duration {
        self.kill_timeout
    }
}

/// Run command lines in order, stopping at the first failure.
pub async fn run_commands<S: AsRef<str>>(
    cancel: &CancellationToken,
    lines: &[S],
    opts: &RunOptions,
) -> Result<(), ExecError> {
    for line in lines {
        run_command(cancel, line.as_ref(), opts).await?;
    }
    Ok(())
}

/// Run a single command line to completion or cancellation.
pub async fn run_command(
    cancel: &CancellationToken,
    line: &str,
    opts: &RunOptions,
) -> Result<(), ExecError> {
    let Some(invocation) = parse(line)? else {
        return Ok(());
    };
    if cancel.is_cancelled() {
        return Err(ExecError::Cancelled);
    }

    let dir = std::path::absolute(&opts.dir)?;
    let argv = invocation.into_argv();
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };

    let Some(path) = look_path(&dir, &opts.env, program) else {
        return not_started(opts, format!("{program}: command not found")).await;
    };
    if !dir.is_dir() {
        return not_started(opts, format!("{}: no such directory", dir.display())).await;
    }

    let mut command = Command::new(&path);
    command
        .args(args)
        .current_dir(&dir)
        .envs(opts.env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => return not_started(opts, format!("{program}: {err}")).await,
    };
    debug!(program = %program, pid = ?child.id(), dir = %dir.display(), "started command");

    let mut pumps = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(out, Arc::clone(&opts.stdout))));
    }
    if let Some(err) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(err, Arc::clone(&opts.stderr))));
    }

    // The group ID outlives the reaped child while descendants remain in it.
    let pid = child.id();
    let status = tokio::select! {
        status = child.wait() => Some(status?),
        _ = cancel.cancelled() => None,
    };

    let mut drained = Box::pin(drain(pumps));
    match status {
        Some(status) => {
            // Descendants may still hold the output pipes open.
            tokio::select! {
                result = &mut drained => {
                    result?;
                    exit_result(status)
                }
                _ = cancel.cancelled() => {
                    debug!(program = %program, "cancelling processes left holding output");
                    stop_group(pid, opts.kill_timeout, &mut drained).await;
                    Err(ExecError::Cancelled)
                }
            }
        }
        None => {
            debug!(program = %program, "cancelling command");
            terminate(&mut child, opts.kill_timeout).await?;
            stop_group(pid, opts.kill_timeout, &mut drained).await;
            Err(ExecError::Cancelled)
        }
    }
}

/// How a command line is executed.
#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    Direct(Vec<String>),
    Script(String),
}

impl Invocation {
    fn into_argv(self) -> Vec<String> {
        match self {
            Invocation::Direct(words) => words,
            Invocation::Script(script) => {
                vec!["sh".to_string(), "-e".to_string(), "-c".to_string(), script]
            }
        }
    }
}

/// Unquoted characters that only a shell can interpret.
const METACHARACTERS: &str = "|&;<>()$`*?[]{}~#\n";

/// Words that are shell builtins or keywords when they start a command.
const SHELL_WORDS: &[&str] = &[
    "!", ".", ":", "alias", "bg", "break", "case", "cd", "command", "continue", "eval", "exec",
    "exit", "export", "fc", "fg", "for", "function", "getopts", "hash", "if", "jobs", "local",
    "read", "readonly", "return", "set", "shift", "source", "time", "times", "trap", "type",
    "ulimit", "umask", "unalias", "unset", "until", "wait", "while", "{",
];

/// Tokenize a command line with POSIX quoting.
///
/// Returns `None` for a blank line.
fn parse(line: &str) -> Result<Option<Invocation>, ExecError> {
    let mut words: Vec<String> = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut needs_shell = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\r' => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(ExecError::Parse("unterminated single quote".into())),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('$' | '`' | '"' | '\\')) => word.push(c),
                            Some('\n') => {}
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => {
                                return Err(ExecError::Parse("unterminated double quote".into()));
                            }
                        },
                        Some(c @ ('$' | '`')) => {
                            needs_shell = true;
                            word.push(c);
                        }
                        Some(c) => word.push(c),
                        None => return Err(ExecError::Parse("unterminated double quote".into())),
                    }
                }
            }
            '\\' => match chars.next() {
                Some('\n') => {}
                Some(c) => {
                    in_word = true;
                    word.push(c);
                }
                None => return Err(ExecError::Parse("trailing backslash".into())),
            },
            '=' if words.is_empty() => {
                // leading VAR=value assignment
                needs_shell = true;
                in_word = true;
                word.push(c);
            }
            c if METACHARACTERS.contains(c) => {
                needs_shell = true;
                in_word = true;
                word.push(c);
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }

    if needs_shell {
        return Ok(Some(Invocation::Script(line.to_string())));
    }
    match words.first() {
        None => Ok(None),
        Some(first) if SHELL_WORDS.contains(&first.as_str()) => {
            Ok(Some(Invocation::Script(line.to_string())))
        }
        Some(_) => Ok(Some(Invocation::Direct(words))),
    }
}

/// Resolve `program` the way a shell would.
///
/// Names containing `/` are taken relative to `dir`; bare names are searched
/// on `PATH` as seen by the child.
fn look_path(dir: &Path, env: &Environment, program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let candidate = dir.join(program);
        return is_executable(&candidate).then_some(candidate);
    }

    let path = env.lookup("PATH")?;
    std::env::split_paths(&path)
        .map(|entry| {
            if entry.as_os_str().is_empty() {
                dir.to_path_buf()
            } else if entry.is_relative() {
                dir.join(entry)
            } else {
                entry
            }
        })
        .map(|entry| entry.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

async fn not_started(opts: &RunOptions, message: String) -> Result<(), ExecError> {
    debug!(%message, "command not started");
    opts.stderr.write(format!("{message}\n").as_bytes()).await?;
    Err(ExecError::Exit {
        code: EXIT_NOT_FOUND,
    })
}

async fn pump<R>(mut reader: R, sink: Sink) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.write(&buf[..n]).await?;
    }
    sink.flush().await
}

async fn drain(pumps: Vec<JoinHandle<io::Result<()>>>) -> io::Result<()> {
    for handle in pumps {
        handle.await.map_err(io::Error::other)??;
    }
    Ok(())
}

/// Stop a running child: SIGINT to its group, then SIGKILL after `grace`.
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) -> io::Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    let group = Pid::from_raw(pid as i32);

    if !grace.is_zero() {
        if let Err(errno) = killpg(group, Signal::SIGINT) {
            debug!(pid, %errno, "failed to interrupt process group");
        }
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            status?;
            return Ok(());
        }
        debug!(pid, ?grace, "process group still running, killing");
    }

    if let Err(errno) = killpg(group, Signal::SIGKILL) {
        debug!(pid, %errno, "failed to kill process group");
    }
    child.wait().await.map(|_| ())
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _grace: Duration) -> io::Result<()> {
    child.kill().await
}

/// Stop what is left of an exited child's group until its output is drained.
#[cfg(unix)]
async fn stop_group<F>(pid: Option<u32>, grace: Duration, drained: &mut F)
where
    F: std::future::Future<Output = io::Result<()>> + Unpin,
{
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    let group = Pid::from_raw(pid as i32);

    if !grace.is_zero() {
        if let Err(errno) = killpg(group, Signal::SIGINT) {
            debug!(pid, %errno, "failed to interrupt process group");
        }
        if tokio::time::timeout(grace, &mut *drained).await.is_ok() {
            return;
        }
        debug!(pid, ?grace, "process group still holds output, killing");
    }

    if let Err(errno) = killpg(group, Signal::SIGKILL) {
        debug!(pid, %errno, "failed to kill process group");
    }
    if let Err(err) = drained.await {
        debug!(error = %err, "output lost while cancelling");
    }
}

#[cfg(not(unix))]
async fn stop_group<F>(_pid: Option<u32>, _grace: Duration, drained: &mut F)
where
    F: std::future::Future<Output = io::Result<()>> + Unpin,
{
    if let Err(err) = drained.await {
        debug!(error = %err, "output lost while cancelling");
    }
}

fn exit_result(status: ExitStatus) -> Result<(), ExecError> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(ExecError::Exit { code });
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ExecError::Exit { code: 128 + signal });
        }
    }
    Err(ExecError::Exit { code: 1 })
}
