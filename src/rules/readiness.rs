//! Readiness detection on a process's output stream.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tracing::debug;

use crate::output::Sink;

/// Incremental substring search over a byte stream.
///
/// Matches are found even when the marker is split across chunks.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    marker: Vec<u8>,
    tail: Vec<u8>,
    found: bool,
}

impl MarkerScanner {
    pub fn new(marker: impl Into<String>) -> Self {
        let marker = marker.into().into_bytes();
        let found = marker.is_empty();
        Self {
            marker,
            tail: Vec::new(),
            found,
        }
    }

    /// Whether the marker has been seen.
    pub fn is_found(&self) -> bool {
        self.found
    }

    /// Feed the next chunk; returns whether the marker has been seen so far.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.found {
            return true;
        }
        let mut window = std::mem::take(&mut self.tail);
        window.extend_from_slice(chunk);
        if window
            .windows(self.marker.len())
            .any(|candidate| candidate == self.marker.as_slice())
        {
            self.found = true;
            return true;
        }
        let keep = self.marker.len().saturating_sub(1).min(window.len());
        self.tail = window.split_off(window.len() - keep);
        false
    }
}

/// Copy `reader` into `tee` and report whether `marker` appears.
///
/// The receiver resolves to `true` as soon as the marker is seen (at once for
/// an empty marker) or `false` if the stream ends first. The stream is
/// drained to the end in the background either way.
pub fn wait_for_text<R>(mut reader: R, marker: impl Into<String>, tee: Sink) -> oneshot::Receiver<bool>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (tx, rx) = oneshot::channel();
    let mut scanner = MarkerScanner::new(marker);

    tokio::spawn(async move {
        let mut tx = Some(tx);
        if scanner.is_found() {
            notify(&mut tx, true);
        }

        let mut buf = vec![0u8; 4 * 1024];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    debug!(error = %err, "stopped reading process output");
                    break;
                }
            };
            if let Err(err) = tee.write(&buf[..n]).await {
                debug!(error = %err, "failed to forward process output");
            }
            if tx.is_some() && scanner.feed(&buf[..n]) {
                notify(&mut tx, true);
            }
        }

        notify(&mut tx, false);
    });

    rx
}

fn notify(tx: &mut Option<oneshot::Sender<bool>>, ready: bool) {
    if let Some(tx) = tx.take() {
        let _ = tx.send(ready);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{BufferSink, NullSink};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_scanner_finds_marker_split_across_chunks() {
        let mut scanner = MarkerScanner::new("listening");

        assert!(!scanner.feed(b"server is list"));
        assert!(scanner.feed(b"ening on :8080"));
        assert!(scanner.feed(b"anything"));
    }

    #[test]
    fn test_scanner_empty_marker_is_found() {
        let mut scanner = MarkerScanner::new("");

        assert!(scanner.is_found());
        assert!(scanner.feed(b""));
    }

    #[test]
    fn test_scanner_no_match() {
        let mut scanner = MarkerScanner::new("ready");

        assert!(!scanner.feed(b"re"));
        assert!(!scanner.feed(b"ad"));
        assert!(!scanner.feed(b"x?"));
        assert!(!scanner.is_found());
    }

    #[tokio::test]
    async fn test_wait_for_text_match() {
        let input: &[u8] = b"one\ntwo\nthree\n";

        let found = wait_for_text(input, "two", Arc::new(NullSink)).await.unwrap();

        assert!(found);
    }

    #[tokio::test]
    async fn test_wait_for_text_no_match() {
        let input: &[u8] = b"one\ntwo\nthree\n";

        let found = wait_for_text(input, "four", Arc::new(NullSink)).await.unwrap();

        assert!(!found);
    }

    #[tokio::test]
    async fn test_wait_for_text_keeps_teeing_after_match() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let tee = Arc::new(BufferSink::new());

        let ready = wait_for_text(reader, "ready", tee.clone());
        writer.write_all(b"booting\nready\n").await.unwrap();
        assert!(ready.await.unwrap());

        writer.write_all(b"serving request\n").await.unwrap();
        drop(writer);

        for _ in 0..50 {
            if tee.contents_string().await.ends_with("serving request\n") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            tee.contents_string().await,
            "booting\nready\nserving request\n"
        );
    }

    #[tokio::test]
    async fn test_wait_for_text_empty_marker_resolves_immediately() {
        let (_writer, reader) = tokio::io::duplex(64);

        let found = wait_for_text(reader, "", Arc::new(NullSink)).await.unwrap();

        assert!(found);
    }
}
