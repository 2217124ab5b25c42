//! Destinations for subprocess output.
//!
//! Rules never write to the console directly; they are handed an
//! [`OutputSink`] for stdout and one for stderr. The binary uses
//! [`PrefixedSink`] so interleaved output from concurrent rules stays
//! attributable, tests use [`BufferSink`].

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::core::types::RuleId;

/// An asynchronous byte sink.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Write the whole buffer.
    async fn write(&self, buf: &[u8]) -> io::Result<()>;

    /// Flush anything buffered.
    async fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Shared handle to a sink.
pub type Sink = Arc<dyn OutputSink>;

/// Discards everything written to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl OutputSink for NullSink {
    async fn write(&self, _buf: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// Collects output in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    buf: Mutex<Vec<u8>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub async fn contents(&self) -> Vec<u8> {
        self.buf.lock().await.clone()
    }

    /// Everything written so far, lossily decoded as UTF-8.
    pub async fn contents_string(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().await).into_owned()
    }
}

#[async_trait]
impl OutputSink for BufferSink {
    async fn write(&self, buf: &[u8]) -> io::Result<()> {
        self.buf.lock().await.extend_from_slice(buf);
        Ok(())
    }
}

/// Adapts any [`AsyncWrite`] into a sink.
#[derive(Debug)]
pub struct WriterSink<W> {
    inner: Mutex<W>,
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Send + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W> OutputSink for WriterSink<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn write(&self, buf: &[u8]) -> io::Result<()> {
        self.inner.lock().await.write_all(buf).await
    }

    async fn flush(&self) -> io::Result<()> {
        self.inner.lock().await.flush().await
    }
}

/// Which console stream a [`PrefixedSink`] writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Writes to the console, starting every line with `[<rule id>] `.
#[derive(Debug)]
pub struct PrefixedSink {
    prefix: Vec<u8>,
    stream: Stream,
    at_line_start: Mutex<bool>,
}

impl PrefixedSink {
    pub fn new(id: &RuleId, stream: Stream) -> Self {
        Self {
            prefix: format!("[{}] ", id).into_bytes(),
            stream,
            at_line_start: Mutex::new(true),
        }
    }

    /// Insert the prefix at every line start in `buf`.
    ///
    /// `at_line_start` carries over between calls so lines split across
    /// writes are prefixed once.
    fn prefix_lines(&self, buf: &[u8], at_line_start: &mut bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(buf.len() + self.prefix.len());
        for &byte in buf {
            if *at_line_start {
                out.extend_from_slice(&self.prefix);
                *at_line_start = false;
            }
            out.push(byte);
            if byte == b'\n' {
                *at_line_start = true;
            }
        }
        out
    }
}

#[async_trait]
impl OutputSink for PrefixedSink {
    async fn write(&self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.at_line_start.lock().await;
        let out = self.prefix_lines(buf, &mut state);
        match self.stream {
            Stream::Stdout => {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&out).await?;
                stdout.flush().await
            }
            Stream::Stderr => {
                let mut stderr = tokio::io::stderr();
                stderr.write_all(&out).await?;
                stderr.flush().await
            }
        }
    }
}

/// Hands out the sinks a rule writes to.
pub trait OutputFactory: Send + Sync {
    fn stdout(&self, id: &RuleId) -> Sink;
    fn stderr(&self, id: &RuleId) -> Sink;
}

/// Console output with per-rule line prefixes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOutput;

impl OutputFactory for ConsoleOutput {
    fn stdout(&self, id: &RuleId) -> Sink {
        Arc::new(PrefixedSink::new(id, Stream::Stdout))
    }

    fn stderr(&self, id: &RuleId) -> Sink {
        Arc::new(PrefixedSink::new(id, Stream::Stderr))
    }
}

/// Discards all output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutput;

impl OutputFactory for NullOutput {
    fn stdout(&self, _id: &RuleId) -> Sink {
        Arc::new(NullSink)
    }

    fn stderr(&self, _id: &RuleId) -> Sink {
        Arc::new(NullSink)
    }
}
