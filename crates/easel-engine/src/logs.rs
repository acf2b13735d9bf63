//! Bounded capture of engine stdout/stderr.
//!
//! A long-running engine can be extremely chatty; only the most recent
//! lines matter for diagnosing a failed readiness probe, so output is
//! drained into a fixed-size ring.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Lines retained per engine.
const RING_CAPACITY: usize = 200;

/// Shared ring buffer over an engine's combined output.
#[derive(Clone, Default)]
pub struct EngineLogs {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl EngineLogs {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock().expect("log ring poisoned");
        if lines.len() == RING_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .expect("log ring poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Drain a child output stream into the ring until EOF.
    ///
    /// Spawned once per stream; the task ends when the child closes the
    /// pipe, so no explicit cancellation is needed.
    pub fn spawn_capture<R>(&self, stream: R, label: &'static str) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let logs = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                logs.push(format!("[{label}] {line}"));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_only_newest_lines() {
        let logs = EngineLogs::new();
        for i in 0..(RING_CAPACITY + 10) {
            logs.push(format!("line {i}"));
        }

        let snapshot = logs.snapshot();
        assert_eq!(snapshot.len(), RING_CAPACITY);
        assert_eq!(snapshot[0], "line 10");
        assert_eq!(snapshot[RING_CAPACITY - 1], format!("line {}", RING_CAPACITY + 9));
    }

    #[tokio::test]
    async fn capture_reads_stream_to_eof() {
        let logs = EngineLogs::new();
        let data: &[u8] = b"ready\nlistening on 8080\n";
        let handle = logs.spawn_capture(data, "stdout");
        handle.await.unwrap();

        let snapshot = logs.snapshot();
        assert_eq!(snapshot, vec!["[stdout] ready", "[stdout] listening on 8080"]);
    }
}
