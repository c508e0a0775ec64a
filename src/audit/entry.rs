//! Audit Log Entries
//!
//! Per-record hash commitments and the finalized per-job summaries
//! that are handed to the export service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Hash commitment for one imported record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub job_id: String,
    pub record_hash: String,
    /// Assigned once the job's trail is finalized
    pub merkle_root: Option<String>,
    /// Assigned once the root has been anchored
    pub anchor_tx: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(job_id: &str, record_hash: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            record_hash,
            merkle_root: None,
            anchor_tx: None,
            created_at: Utc::now(),
        }
    }
}

/// Source breakdown attached to a finalized job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMetadata {
    pub source_counts: BTreeMap<String, u64>,
    pub file_count: u64,
}

/// Finalized audit summary of one import job; the unit of encrypted export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub job_id: String,
    pub root_hash: String,
    pub anchor_tx: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<LedgerMetadata>,
}

impl LedgerEntry {
    pub fn summary(&self) -> String {
        format!(
            "job {}: {} records, root {}, anchor {}",
            self.job_id,
            self.record_count,
            if self.root_hash.is_empty() { "<empty>" } else { &self.root_hash },
            self.anchor_tx.as_deref().unwrap_or("<none>")
        )
    }
}

/// Result of finalizing one job's trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedTrail {
    pub root: String,
    pub transaction_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub job_count: usize,
    pub total_entries: usize,
    pub anchored_transactions: usize,
}

/// Aggregated view of retained audit trails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub summary: ReportSummary,
    pub entries: Vec<AuditLogEntry>,
}
