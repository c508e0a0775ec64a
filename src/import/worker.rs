//! Import Worker Process
//!
//! Spawns the external import binary and reads its byte streams.
//! stdout carries one JSON record per line; stderr carries free-text
//! diagnostics that may announce the total record count.

use regex::Regex;
use std::io;
use std::mem;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{LedgerError, Result};
use crate::import::job::ImportJob;

/// Newline-delimited reader that keeps partial lines between reads.
///
/// `next_line` may be dropped mid-read inside `select!`; bytes read so far
/// stay buffered and the next call resumes the same line.
pub struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Next complete line without its terminator; a final unterminated
    /// line is returned at end of stream
    pub async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.pending).await?;

            if read == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(strip_terminator(mem::take(&mut self.pending))));
            }

            if self.pending.ends_with(b"\n") {
                return Ok(Some(strip_terminator(mem::take(&mut self.pending))));
            }
        }
    }
}

fn strip_terminator(mut line: Vec<u8>) -> Vec<u8> {
    if line.ends_with(b"\n") {
        line.pop();
    }
    if line.ends_with(b"\r") {
        line.pop();
    }
    line
}

fn total_records_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)total\s+records\s*:\s*(\d+)").expect("total records pattern is valid")
    })
}

/// Extract a total-record hint from one diagnostic line.
///
/// Accepts the structured form `{"total_records": N}` as well as free text
/// containing `Total records: N`.
pub fn parse_total_hint(line: &str) -> Option<u64> {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Some(total) = value.get("total_records").and_then(|v| v.as_u64()) {
                return Some(total);
            }
        }
    }

    total_records_pattern()
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A running import worker with its output streams
pub struct WorkerProcess {
    pub child: Child,
    pub stdout: LineReader<ChildStdout>,
    pub stderr: ChildStderr,
}

/// Spawn `<binary> --input <path> --format <fmt> <stream flag> [extra args]`
pub fn spawn_worker(config: &WorkerConfig, job: &ImportJob) -> Result<WorkerProcess> {
    let mut command = Command::new(&config.binary_path);
    command
        .arg("--input")
        .arg(&job.file_path)
        .arg("--format")
        .arg(&job.format);
    if !config.stream_flag.is_empty() {
        command.arg(&config.stream_flag);
    }
    command
        .args(&config.extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| {
        LedgerError::WorkerSpawn(format!("{}: {}", config.binary_path.display(), e))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| LedgerError::WorkerSpawn("worker stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| LedgerError::WorkerSpawn("worker stderr was not captured".to_string()))?;

    info!(
        "Spawned import worker for job {} (pid {:?})",
        job.id,
        child.id()
    );

    Ok(WorkerProcess {
        child,
        stdout: LineReader::new(stdout),
        stderr,
    })
}

/// Drain the worker's diagnostic stream, forwarding total-record hints
pub async fn scan_diagnostics(job_id: String, stderr: ChildStderr, hints: mpsc::Sender<u64>) {
    let mut lines = LineReader::new(stderr);
    loop {
        match lines.next_line().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes);
                debug!("worker[{}]: {}", job_id, line);
                if let Some(total) = parse_total_hint(&line) {
                    // Receiver gone means the job already ended; keep draining
                    let _ = hints.send(total).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read diagnostics of job {}: {}", job_id, e);
                break;
            }
        }
    }
}
