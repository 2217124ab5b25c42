use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::Rule;
use crate::core::types::RuleId;
use crate::error::Error;

/// A named set of source files.
///
/// Its inputs are its outputs; dependents that list it pick up its files for
/// fingerprinting through the graph.
#[derive(Debug, Clone)]
pub struct Filegroup {
    id: RuleId,
    srcs: Vec<String>,
    dir: PathBuf,
}

impl Filegroup {
    pub fn new(id: impl Into<RuleId>, dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            srcs: Vec::new(),
            dir: dir.into(),
        }
    }

    /// Builder: set the source patterns.
    pub fn with_srcs<I, S>(mut self, srcs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.srcs = srcs.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Rule for Filegroup {
    fn id(&self) -> &RuleId {
        &self.id
    }

    fn inputs(&self) -> &[String] {
        &self.srcs
    }

    fn outputs(&self) -> &[String] {
        &self.srcs
    }

    fn working_dir(&self) -> &Path {
        &self.dir
    }

    async fn execute(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        Ok(())
    }
}
