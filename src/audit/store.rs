//! Audit Log Storage
//!
//! Repository seam for per-job hash logs. The in-memory store keeps each
//! job's entries in append order; a durable backend must preserve that
//! order per job.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

use crate::audit::entry::{AuditLogEntry, LedgerEntry, LedgerMetadata};
use crate::comp::CompRecord;
use crate::error::Result;

/// Where a hashed record came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSource {
    pub label: Option<String>,
    pub file: Option<String>,
}

impl RecordSource {
    pub fn of(record: &CompRecord) -> Self {
        Self {
            label: record.source_label().map(str::to_string),
            file: record.source_file().map(str::to_string),
        }
    }
}

#[async_trait]
pub trait AuditLogStore: Send + Sync {
    /// Append an entry to the end of its job's log
    async fn append(&self, entry: AuditLogEntry, source: RecordSource) -> Result<()>;

    /// Entries of a job in append order
    async fn entries(&self, job_id: &str) -> Result<Vec<AuditLogEntry>>;

    /// Entries of every retained job, jobs in first-seen order
    async fn all_entries(&self) -> Result<Vec<AuditLogEntry>>;

    /// Ordered record hashes of a job
    async fn record_hashes(&self, job_id: &str) -> Result<Vec<String>> {
        Ok(self
            .entries(job_id)
            .await?
            .into_iter()
            .map(|entry| entry.record_hash)
            .collect())
    }

    /// Back-fill the Merkle root on every entry of a job; returns entries touched
    async fn set_merkle_root(&self, job_id: &str, root: &str) -> Result<usize>;

    /// Back-fill the anchor reference on every entry of a job; returns entries touched
    async fn set_anchor_tx(&self, job_id: &str, anchor_tx: Option<&str>) -> Result<usize>;

    async fn source_metadata(&self, job_id: &str) -> Result<LedgerMetadata>;

    async fn put_ledger_entry(&self, entry: LedgerEntry) -> Result<()>;

    async fn ledger_entry(&self, job_id: &str) -> Result<Option<LedgerEntry>>;

    /// Finalized summaries, jobs in first-seen order
    async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>>;
}

#[derive(Default)]
struct JobTrail {
    entries: Vec<AuditLogEntry>,
    source_counts: BTreeMap<String, u64>,
    files: BTreeSet<String>,
}

#[derive(Default)]
struct MemoryState {
    trails: HashMap<String, JobTrail>,
    order: Vec<String>,
    ledger: HashMap<String, LedgerEntry>,
}

impl MemoryState {
    fn trail_mut(&mut self, job_id: &str) -> &mut JobTrail {
        if !self.trails.contains_key(job_id) {
            self.order.push(job_id.to_string());
        }
        self.trails.entry(job_id.to_string()).or_default()
    }
}

/// Process-local audit log store
#[derive(Default)]
pub struct InMemoryAuditLogStore {
    state: RwLock<MemoryState>,
}

impl InMemoryAuditLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLogStore for InMemoryAuditLogStore {
    async fn append(&self, entry: AuditLogEntry, source: RecordSource) -> Result<()> {
        let mut state = self.state.write().await;
        let trail = state.trail_mut(&entry.job_id);
        if let Some(label) = source.label {
            *trail.source_counts.entry(label).or_insert(0) += 1;
        }
        if let Some(file) = source.file {
            trail.files.insert(file);
        }
        trail.entries.push(entry);
        Ok(())
    }

    async fn entries(&self, job_id: &str) -> Result<Vec<AuditLogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .trails
            .get(job_id)
            .map(|trail| trail.entries.clone())
            .unwrap_or_default())
    }

    async fn all_entries(&self) -> Result<Vec<AuditLogEntry>> {
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.trails.get(id))
            .flat_map(|trail| trail.entries.iter().cloned())
            .collect())
    }

    async fn set_merkle_root(&self, job_id: &str, root: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        let Some(trail) = state.trails.get_mut(job_id) else {
            return Ok(0);
        };
        for entry in trail.entries.iter_mut() {
            entry.merkle_root = Some(root.to_string());
        }
        Ok(trail.entries.len())
    }

    async fn set_anchor_tx(&self, job_id: &str, anchor_tx: Option<&str>) -> Result<usize> {
        let mut state = self.state.write().await;
        let Some(trail) = state.trails.get_mut(job_id) else {
            return Ok(0);
        };
        for entry in trail.entries.iter_mut() {
            entry.anchor_tx = anchor_tx.map(str::to_string);
        }
        Ok(trail.entries.len())
    }

    async fn source_metadata(&self, job_id: &str) -> Result<LedgerMetadata> {
        let state = self.state.read().await;
        Ok(state
            .trails
            .get(job_id)
            .map(|trail| LedgerMetadata {
                source_counts: trail.source_counts.clone(),
                file_count: trail.files.len() as u64,
            })
            .unwrap_or_default())
    }

    async fn put_ledger_entry(&self, entry: LedgerEntry) -> Result<()> {
        let mut state = self.state.write().await;
        state.trail_mut(&entry.job_id);
        state.ledger.insert(entry.job_id.clone(), entry);
        Ok(())
    }

    async fn ledger_entry(&self, job_id: &str) -> Result<Option<LedgerEntry>> {
        Ok(self.state.read().await.ledger.get(job_id).cloned())
    }

    async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.ledger.get(id).cloned())
            .collect())
    }
}
