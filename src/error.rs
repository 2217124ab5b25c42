//! Error types shared across the engine.
//!
//! Each layer has its own error enum ([`ExecError`] for subprocesses,
//! [`GraphError`] for graph structure, [`ConfigError`] for build files);
//! [`Error`] is what a rule execution or a whole run reports.

use std::sync::Arc;
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::task_graph::GraphError;
use crate::core::types::RuleId;
use crate::execution::ExecError;

/// Errors reported by rule execution and by a run as a whole.
#[derive(Debug, Error)]
pub enum Error {
    /// A shell command failed, was cancelled or could not be parsed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The graph rejected an operation or a lookup failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Loading build definitions failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem failure while reading inputs or the fingerprint cache.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// An input pattern is not a valid glob.
    #[error("invalid input pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// A path matched by an input pattern could not be read.
    #[error("failed to expand input pattern: {0}")]
    Glob(#[from] glob::GlobError),

    /// A process rule's output ended without the readiness marker.
    #[error("process {0} exited without becoming ready")]
    NotReady(RuleId),

    /// A process rule was built without a process supervisor.
    #[error("process rule {0} requires a process supervisor")]
    MissingSupervisor(RuleId),

    /// One or more dependencies failed.
    #[error("{}", join_errors(.0))]
    Dependencies(Vec<Arc<Error>>),

    /// A failure shared between several waiters.
    #[error(transparent)]
    Shared(Arc<Error>),

    /// A worker task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The run was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap an I/O error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error only reports cancellation.
    ///
    /// Aggregates count as cancellation when every member is.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled | Error::Exec(ExecError::Cancelled) => true,
            Error::Shared(inner) => inner.is_cancelled(),
            Error::Dependencies(errors) => {
                !errors.is_empty() && errors.iter().all(|e| e.is_cancelled())
            }
            _ => false,
        }
    }

    /// The exit code of a failed command, if this error carries one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::Exec(err) => err.exit_code(),
            Error::Shared(inner) => inner.exit_code(),
            _ => None,
        }
    }
}

/// Combine failures into a single error.
///
/// Returns `None` for no failures and the failure itself when there is only
/// one. Nested aggregates are flattened and repeated failures (the same
/// dependency reached through several paths) are reported once.
pub fn combine(errors: Vec<Arc<Error>>) -> Option<Arc<Error>> {
    let mut flat: Vec<Arc<Error>> = Vec::with_capacity(errors.len());
    for err in errors {
        let members = match err.as_ref() {
            Error::Dependencies(inner) => inner.clone(),
            _ => vec![err],
        };
        for member in members {
            if !flat.iter().any(|seen| Arc::ptr_eq(seen, &member)) {
                flat.push(member);
            }
        }
    }

    match flat.len() {
        0 => None,
        1 => flat.pop(),
        _ => Some(Arc::new(Error::Dependencies(flat))),
    }
}

fn join_errors(errors: &[Arc<Error>]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
