//! Import Job Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{LedgerError, Result};

/// Denominator floor used while the worker has not reported a total
pub const DEFAULT_TOTAL_ESTIMATE: u64 = 1000;

/// Progress ceiling while the total is unknown and the job is still running
pub const UNKNOWN_TOTAL_PROGRESS_CAP: u8 = 95;

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Import request as submitted by the application layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewImportJob {
    pub owner_id: String,
    pub file_name: String,
    pub file_path: PathBuf,
    pub format: String,
}

impl NewImportJob {
    pub fn new(
        owner_id: impl Into<String>,
        file_name: impl Into<String>,
        file_path: impl Into<PathBuf>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            file_name: file_name.into(),
            file_path: file_path.into(),
            format: format.into(),
        }
    }

    /// Reject empty required fields
    pub fn validate(&self) -> Result<()> {
        if self.owner_id.trim().is_empty() {
            return Err(LedgerError::missing_field("owner_id"));
        }
        if self.file_name.trim().is_empty() {
            return Err(LedgerError::missing_field("file_name"));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err(LedgerError::missing_field("file_path"));
        }
        if self.format.trim().is_empty() {
            return Err(LedgerError::missing_field("format"));
        }
        Ok(())
    }
}

/// One bulk-import run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: String,
    pub owner_id: String,
    pub file_name: String,
    pub file_path: PathBuf,
    pub format: String,
    pub status: JobStatus,
    pub progress: u8,
    pub records_processed: u64,
    pub total_records: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(request: NewImportJob) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: request.owner_id,
            file_name: request.file_name,
            file_path: request.file_path,
            format: request.format,
            status: JobStatus::Pending,
            progress: 0,
            records_processed: 0,
            total_records: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_processing(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_complete(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Complete;
        self.progress = 100;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        let now = Utc::now();
        self.status = JobStatus::Error;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Count one hashed record and refresh progress
    pub fn record_processed(&mut self) {
        self.records_processed += 1;
        self.progress = self.estimate_progress();
        self.updated_at = Utc::now();
    }

    /// Apply a total-record hint from the worker; the latest hint wins
    pub fn set_total_hint(&mut self, total: u64) {
        self.total_records = Some(total);
        self.progress = self.estimate_progress();
    }

    fn estimate_progress(&self) -> u8 {
        let processed = self.records_processed;
        match self.total_records {
            Some(total) if total > 0 => (processed.saturating_mul(100) / total).min(100) as u8,
            _ => {
                let denominator = DEFAULT_TOTAL_ESTIMATE.max(processed.saturating_mul(2));
                let percent = processed.saturating_mul(100) / denominator;
                percent.min(UNKNOWN_TOTAL_PROGRESS_CAP as u64) as u8
            }
        }
    }
}
