//! Job lifecycle notifications

use serde::{Deserialize, Serialize};

use crate::import::job::JobStatus;

/// Closed set of events published by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    JobCreated {
        job_id: String,
        owner_id: String,
    },
    RecordProcessed {
        job_id: String,
        records_processed: u64,
        progress: u8,
    },
    JobStatusChanged {
        job_id: String,
        status: JobStatus,
        error_message: Option<String>,
    },
    /// Published after the audit trail of a successful job is finalized
    JobCompleted {
        job_id: String,
        root: String,
        transaction_ref: Option<String>,
    },
    /// The job's records were imported but its audit trail could not be finalized
    FinalizationFailed {
        job_id: String,
        error: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::JobCreated { job_id, .. }
            | JobEvent::RecordProcessed { job_id, .. }
            | JobEvent::JobStatusChanged { job_id, .. }
            | JobEvent::JobCompleted { job_id, .. }
            | JobEvent::FinalizationFailed { job_id, .. } => job_id,
        }
    }
}
