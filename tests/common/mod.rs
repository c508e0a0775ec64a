//! Shared helpers for integration tests: the scripted import worker and
//! event waiting utilities.

#![allow(dead_code)]

#[path = "../../src/import/test_worker.rs"]
mod test_worker;

pub use test_worker::{release, script_path, side_file, WorkerScript};

use comp_ledger::config::WorkerConfig;
use comp_ledger::import::{ImportOrchestrator, JobEvent, JobStatus};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

pub fn worker_config(max_concurrency: usize) -> WorkerConfig {
    WorkerConfig {
        binary_path: script_path().to_path_buf(),
        max_concurrency,
        ..WorkerConfig::default()
    }
}

pub fn comp_line(i: usize) -> String {
    format!(
        r#"{{"address":"{} Elm St","sale_price_usd":{},"gla_sqft":{},"source_table":"sales_2023"}}"#,
        100 + i,
        250000 + i * 1000,
        1400 + i
    )
}

fn comp_lines(count: usize) -> Vec<String> {
    (0..count).map(comp_line).collect()
}

/// Write an input file with `count` records
pub fn write_input(dir: &Path, name: &str, count: usize) -> PathBuf {
    let lines = comp_lines(count);
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    WorkerScript::new(dir, name).records(&lines).write()
}

/// Write an input file whose worker keeps emitting its `count` records
pub fn write_repeating_input(dir: &Path, name: &str, count: usize) -> PathBuf {
    let lines = comp_lines(count);
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    WorkerScript::new(dir, name).records(&lines).repeat().write()
}

pub fn set_exit_code(input: &Path, code: i32) {
    std::fs::write(side_file(input, "exit"), code.to_string()).unwrap();
}

pub fn set_stderr(input: &Path, text: &str) {
    std::fs::write(side_file(input, "stderr"), format!("{}\n", text)).unwrap();
}

/// Keep the worker for `input` running until `release`
pub fn hold(input: &Path) {
    std::fs::write(side_file(input, "hold"), "").unwrap();
}

pub async fn wait_for<F>(events: &mut broadcast::Receiver<JobEvent>, mut pred: F) -> JobEvent
where
    F: FnMut(&JobEvent) -> bool,
{
    timeout(Duration::from_secs(15), async {
        loop {
            let event = events.recv().await.expect("event stream");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for job event")
}

pub fn is_status(event: &JobEvent, id: &str, wanted: JobStatus) -> bool {
    matches!(event, JobEvent::JobStatusChanged { job_id, status, .. } if job_id == id && *status == wanted)
}

/// Poll until the job reports `wanted`
pub async fn wait_for_status(orchestrator: &ImportOrchestrator, id: &str, wanted: JobStatus) {
    timeout(Duration::from_secs(15), async {
        loop {
            if let Some(job) = orchestrator.get_job(id).await.unwrap() {
                if job.status == wanted {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for job status")
}
