//! Skip rules whose inputs have not changed.
//!
//! The fingerprint of a rule is a CRC-32 over every file its input patterns
//! match, in sorted order, each fed as its path relative to the working
//! directory followed by its contents. After a successful run the
//! fingerprint is stored in the cache directory under the rule ID; the next
//! run compares and skips the rule when nothing changed.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::Rule;
use crate::core::types::RuleId;
use crate::error::Error;
use crate::output::Sink;

/// Directory, relative to the workspace root, holding stored fingerprints.
pub const DEFAULT_CACHE_DIR: &str = ".taskgraph";

/// Stored fingerprints, one plain-text file per rule.
#[derive(Debug, Clone)]
pub struct FingerprintCache {
    dir: PathBuf,
}

impl FingerprintCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache at its default location under a workspace root.
    pub fn for_workspace(root: &Path) -> Self {
        Self::new(root.join(DEFAULT_CACHE_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the fingerprint of `id` is stored.
    pub fn path(&self, id: &RuleId) -> PathBuf {
        self.dir.join(id.as_str().trim_start_matches('/'))
    }

    /// The stored fingerprint, or an empty string if the rule never ran.
    pub async fn load(&self, id: &RuleId) -> Result<String, Error> {
        let path = self.path(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents.trim().to_string()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(Error::io(format!("read {}", path.display()), err)),
        }
    }

    pub async fn store(&self, id: &RuleId, fingerprint: &str) -> Result<(), Error> {
        let path = self.path(id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(format!("create {}", parent.display()), e))?;
        }
        tokio::fs::write(&path, fingerprint)
            .await
            .map_err(|e| Error::io(format!("write {}", path.display()), e))
    }
}

/// Compute the fingerprint of the files matched by `patterns` under `dir`.
///
/// Returns lowercase 8-digit hex.
pub async fn fingerprint(dir: &Path, patterns: &[String]) -> Result<String, Error> {
    let dir = dir.to_path_buf();
    let patterns = patterns.to_vec();
    tokio::task::spawn_blocking(move || fingerprint_blocking(&dir, &patterns))
        .await
        .map_err(|e| Error::Panicked(e.to_string()))?
}

fn fingerprint_blocking(dir: &Path, patterns: &[String]) -> Result<String, Error> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut files = BTreeSet::new();
    for pattern in patterns {
        let full = Path::new(&base).join(pattern);
        for entry in glob::glob(&full.to_string_lossy())? {
            let path = entry?;
            if path.is_file() {
                files.insert(path);
            }
        }
    }

    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    for path in &files {
        let relative = path.strip_prefix(dir).unwrap_or(path);
        hasher.update(relative.to_string_lossy().as_bytes());

        let mut file =
            File::open(path).map_err(|e| Error::io(format!("open {}", path.display()), e))?;
        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| Error::io(format!("read {}", path.display()), e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
    }

    Ok(format!("{:08x}", hasher.finalize()))
}

/// Runs the wrapped rule only when its inputs changed since the last
/// successful run.
pub struct Checksum {
    inner: Box<dyn Rule>,
    cache: FingerprintCache,
    stdout: Sink,
}

impl Checksum {
    pub fn new(inner: Box<dyn Rule>, cache: FingerprintCache, stdout: Sink) -> Self {
        Self {
            inner,
            cache,
            stdout,
        }
    }

    pub fn inner(&self) -> &dyn Rule {
        self.inner.as_ref()
    }
}

#[async_trait]
impl Rule for Checksum {
    fn id(&self) -> &RuleId {
        self.inner.id()
    }

    fn inputs(&self) -> &[String] {
        self.inner.inputs()
    }

    fn outputs(&self) -> &[String] {
        self.inner.outputs()
    }

    fn dependencies(&self) -> &[RuleId] {
        self.inner.dependencies()
    }

    fn working_dir(&self) -> &Path {
        self.inner.working_dir()
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<(), Error> {
        if self.inputs().is_empty() {
            return self.inner.execute(cancel).await;
        }

        let id = self.id();
        let current = fingerprint(self.working_dir(), self.inputs()).await?;
        let previous = self.cache.load(id).await?;
        if current == previous {
            debug!(rule = %id, fingerprint = %current, "inputs unchanged, skipping");
            self.stdout
                .write(format!("{id} is up-to-date\n").as_bytes())
                .await
                .map_err(|e| Error::io("write to stdout", e))?;
            return Ok(());
        }

        self.inner.execute(cancel).await?;

        if let Err(err) = self.cache.store(id, &current).await {
            error!(rule = %id, error = %err, "failed to store fingerprint");
        }
        Ok(())
    }
}
