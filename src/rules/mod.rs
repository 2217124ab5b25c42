//! Units of work.
//!
//! A [`Rule`] has an identity, declared inputs, outputs and dependencies, and
//! an `execute` action. Concrete rules:
//!
//! - [`TaskRule`] runs shell commands in order.
//! - [`ProcessRule`] starts a long-running command and returns once it is
//!   ready, leaving it running under a [`ProcessSupervisor`].
//! - [`Filegroup`] names a set of files; executing it does nothing.
//! - [`Checksum`] wraps another rule and skips it when its inputs are
//!   unchanged since the last successful run.
//!
//! [`ProcessSupervisor`]: crate::execution::ProcessSupervisor

mod checksum;
mod filegroup;
mod process;
mod readiness;
mod task;

pub use checksum::{Checksum, DEFAULT_CACHE_DIR, FingerprintCache, fingerprint};
pub use filegroup::Filegroup;
pub use process::{ProcessRule, ProcessRuleBuilder};
pub use readiness::{MarkerScanner, wait_for_text};
pub use task::{TaskRule, TaskRuleBuilder};

use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::core::types::RuleId;
use crate::error::Error;

/// The core trait for units of work in the graph.
///
/// # Example
///
/// ```ignore
/// use taskgraph::{Error, Rule, RuleId};
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
///
/// struct Touch {
///     id: RuleId,
///     dir: std::path::PathBuf,
/// }
///
/// #[async_trait]
/// impl Rule for Touch {
///     fn id(&self) -> &RuleId {
///         &self.id
///     }
///
///     fn working_dir(&self) -> &std::path::Path {
///         &self.dir
///     }
///
///     async fn execute(&self, _cancel: &CancellationToken) -> Result<(), Error> {
///         tokio::fs::write(self.dir.join("stamp"), b"")
///             .await
///             .map_err(|e| Error::io("touch stamp", e))
///     }
/// }
/// ```
#[async_trait]
pub trait Rule: Send + Sync {
    /// Unique identifier, e.g. `//app:build`.
    fn id(&self) -> &RuleId;

    /// Glob patterns, relative to the working directory, that the rule reads.
    fn inputs(&self) -> &[String] {
        &[]
    }

    /// Paths the rule declares it produces. Not verified.
    fn outputs(&self) -> &[String] {
        &[]
    }

    /// IDs of the rules that must complete first.
    fn dependencies(&self) -> &[RuleId] {
        &[]
    }

    /// Directory that commands run in and inputs are resolved against.
    fn working_dir(&self) -> &Path;

    /// Perform the work.
    ///
    /// Implementations should return promptly with an error once `cancel`
    /// fires.
    async fn execute(&self, cancel: &CancellationToken) -> Result<(), Error>;
}
