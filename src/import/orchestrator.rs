//! Import Job Orchestrator
//!
//! Runs import jobs against a concurrency ceiling. Each active job owns one
//! worker process and one task; the task is the only writer of its job while
//! it is active, and receives cancellation as a message so that no record is
//! hashed after a cancel has been acknowledged.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::audit::AuditLedger;
use crate::comp::CompRecord;
use crate::config::WorkerConfig;
use crate::error::{LedgerError, Result};
use crate::import::events::JobEvent;
use crate::import::job::{ImportJob, JobStatus, NewImportJob, CANCELLED_MESSAGE};
use crate::import::store::JobStore;
use crate::import::worker::{scan_diagnostics, spawn_worker, WorkerProcess};

const EVENT_CAPACITY: usize = 1024;

enum Control {
    Cancel(oneshot::Sender<()>),
}

struct ActiveJob {
    control: mpsc::Sender<Control>,
}

struct Inner {
    worker: WorkerConfig,
    jobs: Arc<dyn JobStore>,
    ledger: Arc<AuditLedger>,
    events: broadcast::Sender<JobEvent>,
    active: Mutex<HashMap<String, ActiveJob>>,
}

/// Job-control handle; clones share the same registry and workers
#[derive(Clone)]
pub struct ImportOrchestrator {
    inner: Arc<Inner>,
}

impl ImportOrchestrator {
    pub fn new(worker: WorkerConfig, jobs: Arc<dyn JobStore>, ledger: Arc<AuditLedger>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                worker,
                jobs,
                ledger,
                events,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a listener for job lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.inner.ledger
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.worker.max_concurrency
    }

    /// Validate and register a job, then try to schedule it
    pub async fn create_job(&self, request: NewImportJob) -> Result<String> {
        request.validate()?;
        if tokio::fs::metadata(&request.file_path).await.is_err() {
            return Err(LedgerError::InvalidInput(format!(
                "Input file not found: {}",
                request.file_path.display()
            )));
        }

        let job = ImportJob::new(request);
        let job_id = job.id.clone();
        let owner_id = job.owner_id.clone();
        self.inner.jobs.insert(job).await?;
        info!("Created import job {} for owner {}", job_id, owner_id);
        self.inner.emit(JobEvent::JobCreated {
            job_id: job_id.clone(),
            owner_id,
        });

        schedule(Arc::clone(&self.inner)).await;
        Ok(job_id)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<ImportJob>> {
        self.inner.jobs.get(id).await
    }

    pub async fn get_jobs_by_owner(&self, owner_id: &str) -> Result<Vec<ImportJob>> {
        self.inner.jobs.list_by_owner(owner_id).await
    }

    pub async fn get_all_jobs(&self) -> Result<Vec<ImportJob>> {
        self.inner.jobs.list().await
    }

    /// Number of jobs currently holding a worker slot
    pub async fn active_count(&self) -> usize {
        self.inner.active.lock().await.len()
    }

    /// Stop a job. Returns false only when the job does not exist.
    pub async fn cancel_job(&self, id: &str) -> Result<bool> {
        let active = self.inner.active.lock().await;

        if let Some(running) = active.get(id) {
            let control = running.control.clone();
            drop(active);

            let (ack_tx, ack_rx) = oneshot::channel();
            if control.send(Control::Cancel(ack_tx)).await.is_ok() {
                // Dropped ack means the worker finished before the cancel arrived
                let _ = ack_rx.await;
            }
            return Ok(true);
        }

        let Some(mut job) = self.inner.jobs.get(id).await? else {
            return Ok(false);
        };

        if job.status == JobStatus::Pending {
            job.mark_error(CANCELLED_MESSAGE);
            self.inner.save(&job).await;
            self.inner.emit_status(&job);
            info!("Cancelled pending import job {}", id);
        } else {
            debug!("Import job {} is already {}, nothing to cancel", id, job.status);
        }

        drop(active);
        Ok(true)
    }

    /// Cancel if needed, forget the job and delete its input file
    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        if !self.cancel_job(id).await? {
            return Ok(false);
        }

        let Some(job) = self.inner.jobs.remove(id).await? else {
            return Ok(false);
        };
        remove_input_file(&job.file_path).await;
        info!("Deleted import job {}", id);
        Ok(true)
    }
}

/// Delete a job's input file; absence is not an error
async fn remove_input_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed input file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Input file {} already removed", path.display())
        }
        Err(e) => warn!("Failed to remove input file {}: {}", path.display(), e),
    }
}

impl Inner {
    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_status(&self, job: &ImportJob) {
        self.emit(JobEvent::JobStatusChanged {
            job_id: job.id.clone(),
            status: job.status,
            error_message: job.error_message.clone(),
        });
    }

    async fn save(&self, job: &ImportJob) {
        if let Err(e) = self.jobs.update(job.clone()).await {
            error!("Failed to persist import job {}: {}", job.id, e);
        }
    }

    /// Parse, hash and count one stdout line
    async fn ingest_line(&self, job: &mut ImportJob, line: &[u8]) {
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }

        let record = match CompRecord::from_json_line(line) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping malformed record from job {}: {}", job.id, e);
                return;
            }
        };

        if let Err(e) = self.ledger.log_import(&job.id, &record).await {
            error!("Failed to log record for job {}: {}", job.id, e);
            return;
        }

        job.record_processed();
        self.save(job).await;
        self.emit(JobEvent::RecordProcessed {
            job_id: job.id.clone(),
            records_processed: job.records_processed,
            progress: job.progress,
        });
    }
}

/// Promote the oldest pending jobs while worker slots remain
async fn schedule(inner: Arc<Inner>) {
    let mut active = inner.active.lock().await;

    while active.len() < inner.worker.max_concurrency {
        let jobs = match inner.jobs.list().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to list import jobs for scheduling: {}", e);
                return;
            }
        };

        let Some(mut job) = jobs
            .into_iter()
            .filter(|job| job.status == JobStatus::Pending && !active.contains_key(&job.id))
            .min_by_key(|job| job.created_at)
        else {
            break;
        };

        match spawn_worker(&inner.worker, &job) {
            Ok(process) => {
                job.mark_processing();
                inner.save(&job).await;
                inner.emit_status(&job);

                let (control_tx, control_rx) = mpsc::channel(1);
                active.insert(job.id.clone(), ActiveJob { control: control_tx });
                info!(
                    "Import job {} processing ({}/{} slots)",
                    job.id,
                    active.len(),
                    inner.worker.max_concurrency
                );
                tokio::spawn(run_job(Arc::clone(&inner), job, process, control_rx));
            }
            Err(e) => {
                error!("Import job {} failed to start: {}", job.id, e);
                job.mark_error(e.to_string());
                inner.save(&job).await;
                inner.emit_status(&job);
            }
        }
    }
}

/// Drive one job to a terminal state, release its slot and reschedule
fn run_job(
    inner: Arc<Inner>,
    job: ImportJob,
    process: WorkerProcess,
    control: mpsc::Receiver<Control>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let job_id = job.id.clone();
        let (job, ack) = drive_worker(&inner, job, process, control).await;

        inner.active.lock().await.remove(&job_id);
        if let Some(ack) = ack {
            let _ = ack.send(());
        }

        if job.status == JobStatus::Complete {
            let finalizer = Arc::clone(&inner);
            tokio::spawn(async move {
                match finalizer.ledger.finalize(&job_id).await {
                    Ok(trail) => finalizer.emit(JobEvent::JobCompleted {
                        job_id,
                        root: trail.root,
                        transaction_ref: trail.transaction_ref,
                    }),
                    Err(e) => {
                        error!("Failed to finalize audit trail of job {}: {}", job_id, e);
                        finalizer.emit(JobEvent::FinalizationFailed {
                            job_id,
                            error: e.to_string(),
                        });
                    }
                }
            });
        }

        schedule(inner).await;
    })
}

async fn drive_worker(
    inner: &Inner,
    mut job: ImportJob,
    process: WorkerProcess,
    mut control: mpsc::Receiver<Control>,
) -> (ImportJob, Option<oneshot::Sender<()>>) {
    let WorkerProcess {
        mut child,
        mut stdout,
        stderr,
    } = process;

    let (hint_tx, mut hints) = mpsc::channel(16);
    let diagnostics = tokio::spawn(scan_diagnostics(job.id.clone(), stderr, hint_tx));
    let mut stdout_open = true;

    loop {
        tokio::select! {
            biased;

            Some(Control::Cancel(ack)) = control.recv() => {
                if let Err(e) = child.start_kill() {
                    warn!("Failed to signal worker of job {}: {}", job.id, e);
                }
                if let Err(e) = child.wait().await {
                    warn!("Failed to reap worker of job {}: {}", job.id, e);
                }
                diagnostics.abort();

                job.mark_error(CANCELLED_MESSAGE);
                inner.save(&job).await;
                inner.emit_status(&job);
                info!("Cancelled import job {} after {} records", job.id, job.records_processed);
                return (job, Some(ack));
            }

            Some(total) = hints.recv() => {
                debug!("Job {} reports {} total records", job.id, total);
                job.set_total_hint(total);
            }

            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(bytes)) => inner.ingest_line(&mut job, &bytes).await,
                Ok(None) => stdout_open = false,
                Err(e) => {
                    warn!("Failed to read output of job {}: {}", job.id, e);
                    stdout_open = false;
                }
            },

            status = child.wait(), if !stdout_open => {
                match status {
                    Ok(status) if status.success() => {
                        job.mark_complete();
                        info!("Import job {} complete: {} records", job.id, job.records_processed);
                    }
                    Ok(status) => {
                        let err = match status.code() {
                            Some(code) => LedgerError::exit_code(code),
                            None => LedgerError::terminated_by_signal(),
                        };
                        error!("Import job {} failed: {}", job.id, err);
                        job.mark_error(err.to_string());
                    }
                    Err(e) => {
                        error!("Failed to wait for worker of job {}: {}", job.id, e);
                        job.mark_error(format!("Failed to wait for import worker: {}", e));
                    }
                }
                inner.save(&job).await;
                inner.emit_status(&job);
                return (job, None);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audit::store::RecordSource;
    use crate::audit::{AuditLogEntry, AuditLogStore, InMemoryAuditLogStore, LedgerEntry, LedgerMetadata};
    use crate::import::store::InMemoryJobStore;
    use crate::import::test_worker::{release, script_path, WorkerScript};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::timeout;

    fn worker_config(max_concurrency: usize) -> WorkerConfig {
        WorkerConfig {
            binary_path: script_path().to_path_buf(),
            max_concurrency,
            ..WorkerConfig::default()
        }
    }

    fn orchestrator(max_concurrency: usize) -> ImportOrchestrator {
        ImportOrchestrator::new(
            worker_config(max_concurrency),
            Arc::new(InMemoryJobStore::new()),
            Arc::new(AuditLedger::in_memory()),
        )
    }

    async fn wait_for<F>(events: &mut broadcast::Receiver<JobEvent>, mut pred: F) -> JobEvent
    where
        F: FnMut(&JobEvent) -> bool,
    {
        timeout(Duration::from_secs(10), async {
            loop {
                let event = events.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for job event")
    }

    fn is_status(event: &JobEvent, id: &str, wanted: JobStatus) -> bool {
        matches!(event, JobEvent::JobStatusChanged { job_id, status, .. } if job_id == id && *status == wanted)
    }

    #[tokio::test]
    async fn test_create_job_rejects_invalid_input() {
        let orchestrator = orchestrator(3);
        let dir = tempdir().unwrap();

        let err = orchestrator
            .create_job(NewImportJob::new("", "a.db", dir.path().join("a.db"), "sqlite"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        let err = orchestrator
            .create_job(NewImportJob::new("owner", "a.db", dir.path().join("missing.db"), "sqlite"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(msg) if msg.contains("not found")));
        assert!(orchestrator.get_all_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_job_skips_malformed_lines() {
        let orchestrator = orchestrator(3);
        let mut events = orchestrator.subscribe();
        let dir = tempdir().unwrap();
        let input = WorkerScript::new(dir.path(), "comps")
            .records(&[
                r#"{"address":"1 Main St","sale_price_usd":300000}"#,
                "{broken",
                r#"{"address":"2 Main St","sale_price_usd":310000}"#,
                r#"["not","an","object"]"#,
                r#"{"address":"3 Main St","sale_price_usd":"320000","gla_sqft":1850.5}"#,
            ])
            .stderr("Total records: 3")
            .write();

        let id = orchestrator
            .create_job(NewImportJob::new("owner", "comps.ndjson", &input, "ndjson"))
            .await
            .unwrap();

        let completed = wait_for(&mut events, |e| matches!(e, JobEvent::JobCompleted { .. })).await;
        let job = orchestrator.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.records_processed, 3);
        assert_eq!(job.progress, 100);

        let hashes: Vec<String> = orchestrator
            .ledger()
            .entries(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.record_hash)
            .collect();
        match completed {
            JobEvent::JobCompleted { root, transaction_ref, .. } => {
                assert_eq!(root, crate::audit::merkle_root(&hashes));
                assert!(transaction_ref.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    /// Accepts records but cannot commit a root
    struct RootlessStore(InMemoryAuditLogStore);

    #[async_trait::async_trait]
    impl AuditLogStore for RootlessStore {
        async fn append(&self, entry: AuditLogEntry, source: RecordSource) -> Result<()> {
            self.0.append(entry, source).await
        }
        async fn entries(&self, job_id: &str) -> Result<Vec<AuditLogEntry>> {
            self.0.entries(job_id).await
        }
        async fn all_entries(&self) -> Result<Vec<AuditLogEntry>> {
            self.0.all_entries().await
        }
        async fn set_merkle_root(&self, _job_id: &str, _root: &str) -> Result<usize> {
            Err(LedgerError::Repository("root column unavailable".to_string()))
        }
        async fn set_anchor_tx(&self, job_id: &str, anchor_tx: Option<&str>) -> Result<usize> {
            self.0.set_anchor_tx(job_id, anchor_tx).await
        }
        async fn source_metadata(&self, job_id: &str) -> Result<LedgerMetadata> {
            self.0.source_metadata(job_id).await
        }
        async fn put_ledger_entry(&self, entry: LedgerEntry) -> Result<()> {
            self.0.put_ledger_entry(entry).await
        }
        async fn ledger_entry(&self, job_id: &str) -> Result<Option<LedgerEntry>> {
            self.0.ledger_entry(job_id).await
        }
        async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
            self.0.ledger_entries().await
        }
    }

    #[tokio::test]
    async fn test_finalization_failure_is_published() {
        let ledger = AuditLedger::new(Arc::new(RootlessStore(InMemoryAuditLogStore::new())), None);
        let orchestrator = ImportOrchestrator::new(
            worker_config(3),
            Arc::new(InMemoryJobStore::new()),
            Arc::new(ledger),
        );
        let mut events = orchestrator.subscribe();
        let dir = tempdir().unwrap();
        let input = WorkerScript::new(dir.path(), "comps")
            .records(&[r#"{"address":"1 Main St","sale_price_usd":1}"#])
            .write();

        let id = orchestrator
            .create_job(NewImportJob::new("owner", "comps", &input, "ndjson"))
            .await
            .unwrap();

        let event = wait_for(&mut events, |e| {
            matches!(e, JobEvent::JobCompleted { .. } | JobEvent::FinalizationFailed { .. })
        })
        .await;
        match event {
            JobEvent::FinalizationFailed { job_id, error } => {
                assert_eq!(job_id, id);
                assert!(error.contains("root column unavailable"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            orchestrator.get_job(&id).await.unwrap().unwrap().status,
            JobStatus::Complete
        );
        assert!(orchestrator.ledger().ledger_entry(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_never_reaches_processing() {
        let mut config = worker_config(3);
        config.binary_path = "/nonexistent/comp-import-worker".into();
        let orchestrator = ImportOrchestrator::new(
            config,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(AuditLedger::in_memory()),
        );
        let mut events = orchestrator.subscribe();
        let dir = tempdir().unwrap();
        let input = WorkerScript::new(dir.path(), "comps").write();

        let id = orchestrator
            .create_job(NewImportJob::new("owner", "comps", &input, "ndjson"))
            .await
            .unwrap();

        let job = orchestrator.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.started_at.is_none());
        assert!(job.error_message.unwrap().contains("comp-import-worker"));
        assert_eq!(orchestrator.active_count().await, 0);

        while let Ok(event) = events.try_recv() {
            assert!(!is_status(&event, &id, JobStatus::Processing));
        }
    }

    #[tokio::test]
    async fn test_cancel_pending_and_unknown_jobs() {
        let orchestrator = orchestrator(1);
        let dir = tempdir().unwrap();
        let first = WorkerScript::new(dir.path(), "first").hold().write();
        let second = WorkerScript::new(dir.path(), "second").write();

        let running = orchestrator
            .create_job(NewImportJob::new("owner", "first", &first, "ndjson"))
            .await
            .unwrap();
        let queued = orchestrator
            .create_job(NewImportJob::new("owner", "second", &second, "ndjson"))
            .await
            .unwrap();

        assert!(orchestrator.cancel_job(&queued).await.unwrap());
        let job = orchestrator.get_job(&queued).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_message.as_deref(), Some(CANCELLED_MESSAGE));

        assert!(!orchestrator.cancel_job("no-such-job").await.unwrap());
        assert!(orchestrator.cancel_job(&running).await.unwrap());
        assert_eq!(
            orchestrator.get_job(&running).await.unwrap().unwrap().status,
            JobStatus::Error
        );
    }

    #[tokio::test]
    async fn test_released_worker_reports_exit_code() {
        let orchestrator = orchestrator(3);
        let mut events = orchestrator.subscribe();
        let dir = tempdir().unwrap();
        let input = WorkerScript::new(dir.path(), "failing")
            .records(&[r#"{"address":"1 Main St","sale_price_usd":1}"#])
            .exit_code(2)
            .hold()
            .write();

        let id = orchestrator
            .create_job(NewImportJob::new("owner", "failing", &input, "ndjson"))
            .await
            .unwrap();
        assert_eq!(orchestrator.active_count().await, 1);

        release(&input);
        match wait_for(&mut events, |e| is_status(e, &id, JobStatus::Error)).await {
            JobEvent::JobStatusChanged { error_message, .. } => {
                assert_eq!(error_message.as_deref(), Some("Import worker exited with code 2"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(orchestrator.get_job(&id).await.unwrap().unwrap().records_processed, 1);
    }

    #[tokio::test]
    async fn test_delete_job_removes_input_file_idempotently() {
        let orchestrator = orchestrator(3);
        let mut events = orchestrator.subscribe();
        let dir = tempdir().unwrap();
        let input = WorkerScript::new(dir.path(), "comps")
            .records(&[r#"{"address":"1 Main St","sale_price_usd":1}"#])
            .write();

        let id = orchestrator
            .create_job(NewImportJob::new("owner", "comps", &input, "ndjson"))
            .await
            .unwrap();
        wait_for(&mut events, |e| is_status(e, &id, JobStatus::Complete)).await;

        assert!(orchestrator.delete_job(&id).await.unwrap());
        assert!(!input.exists());
        assert!(orchestrator.get_job(&id).await.unwrap().is_none());
        assert!(!orchestrator.delete_job(&id).await.unwrap());

        remove_input_file(&input).await;
    }
}
