//! Scanning the server's output for readiness and mirroring it to a log file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::core::config::data::path_display;

const READY_MARKERS: &[&str] = &["HTTP server listening", "server is listening"];
const LOAD_FAILURE_MARKERS: &[&str] = &["unable to load model", "failed to load model"];

/// What a single output line says about startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Carries the line that reported the failure.
    LoadFailed(String),
}

pub fn classify_line(line: &str) -> Option<Readiness> {
    if READY_MARKERS.iter().any(|marker| line.contains(marker)) {
        Some(Readiness::Ready)
    } else if LOAD_FAILURE_MARKERS
        .iter()
        .any(|marker| line.contains(marker))
    {
        Some(Readiness::LoadFailed(line.trim().to_string()))
    } else {
        None
    }
}

/// Append-only log of everything the server prints. Cloned handles share one
/// writer; a log that could not be opened silently drops lines.
#[derive(Clone, Default)]
pub struct ServerLog {
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl ServerLog {
    pub fn open(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Self {
                writer: Arc::new(Mutex::new(Some(BufWriter::new(file)))),
            },
            Err(err) => {
                warn!(path = %path_display(path), error = %err, "Could not open llama-server log");
                Self::default()
            }
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn append(&self, line: &str) {
        let Ok(mut guard) = self.writer.lock() else {
            return;
        };
        let Some(writer) = guard.as_mut() else {
            return;
        };
        if let Err(err) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            warn!(error = %err, "Writing llama-server log failed; disabling it");
            *guard = None;
        }
    }
}

/// Read `pipe` line by line until it closes, logging every line and
/// reporting readiness markers on `signals`. Token pieces need not be valid
/// UTF-8, so lines are decoded lossily instead of ending the read.
pub fn spawn_reader<R>(
    pipe: R,
    stream: &'static str,
    log: ServerLog,
    signals: mpsc::UnboundedSender<Readiness>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(stream, error = %err, "Reading llama-server output failed");
                    break;
                }
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            trace!(stream, line = %line, "llama-server output");
            log.append(line);
            if let Some(signal) = classify_line(line) {
                // Nobody listens once startup is decided.
                let _ = signals.send(signal);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn recognises_ready_and_failure_markers() {
        assert_eq!(
            classify_line("main: HTTP server listening, hostname: 127.0.0.1, port: 8080"),
            Some(Readiness::Ready)
        );
        assert_eq!(
            classify_line("srv  main: server is listening on http://127.0.0.1:8080"),
            Some(Readiness::Ready)
        );
        assert_eq!(
            classify_line("  main: failed to load model '/m.gguf'\n"),
            Some(Readiness::LoadFailed("main: failed to load model '/m.gguf'".to_string()))
        );
        assert_eq!(classify_line("llm_load_tensors: offloading 32 layers"), None);
    }

    #[test]
    fn log_appends_across_opens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("llama-server.log");

        ServerLog::open(&path).append("first");
        let log = ServerLog::open(&path);
        log.clone().append("second");
        log.append("third");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\nthird\n");
    }

    #[test]
    fn unopenable_log_is_ignored() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be opened for appending.
        let log = ServerLog::open(dir.path());
        log.append("dropped");
        ServerLog::disabled().append("dropped");
    }

    #[tokio::test]
    async fn reader_logs_lines_and_reports_markers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let input: &[u8] = b"loading\nmain: HTTP server listening\nidle\n";
        spawn_reader(input, "stdout", ServerLog::open(&path), tx)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Readiness::Ready));
        assert_eq!(rx.recv().await, None);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "loading\nmain: HTTP server listening\nidle\n"
        );
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_stop_the_reader() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &[u8] = b"token piece \xe2\x96\r\nmain: HTTP server listening\n";
        spawn_reader(input, "stdout", ServerLog::disabled(), tx)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Readiness::Ready));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn last_line_without_newline_is_read() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &[u8] = b"warming up\nmain: failed to load model 'x.gguf'";
        spawn_reader(input, "stderr", ServerLog::disabled(), tx)
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Readiness::LoadFailed("main: failed to load model 'x.gguf'".to_string()))
        );
    }
}
