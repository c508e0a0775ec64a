//! Audit Ledger
//!
//! Hashes every imported record into its job's append-only log, commits to
//! the ordered log with a Merkle root at finalization and anchors that root
//! externally. Anchoring failures never fail finalization.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::anchor::AnchorService;
use crate::audit::entry::{AuditLogEntry, AuditReport, FinalizedTrail, LedgerEntry, ReportSummary};
use crate::audit::hashing::hash_record;
use crate::audit::merkle::{merkle_proof, merkle_root, MerkleProof};
use crate::audit::store::{AuditLogStore, InMemoryAuditLogStore, RecordSource};
use crate::comp::CompRecord;
use crate::error::Result;

pub struct AuditLedger {
    store: Arc<dyn AuditLogStore>,
    anchor: Option<Arc<dyn AnchorService>>,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn AuditLogStore>, anchor: Option<Arc<dyn AnchorService>>) -> Self {
        Self { store, anchor }
    }

    /// Ledger over a process-local store with no anchor service
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryAuditLogStore::new()), None)
    }

    /// Hash a record and append it to the job's log
    pub async fn log_import(&self, job_id: &str, record: &CompRecord) -> Result<String> {
        let hash = hash_record(record)?;
        let entry = AuditLogEntry::new(job_id, hash.clone());
        self.store.append(entry, RecordSource::of(record)).await?;
        debug!("Logged record {} for job {}", hash, job_id);
        Ok(hash)
    }

    /// Compute the job's root over its ordered record hashes and back-fill it
    pub async fn compute_merkle_root(&self, job_id: &str) -> Result<String> {
        let hashes = self.store.record_hashes(job_id).await?;
        let root = merkle_root(&hashes);
        let updated = self.store.set_merkle_root(job_id, &root).await?;
        debug!("Merkle root for job {} over {} entries: {}", job_id, updated, root);
        Ok(root)
    }

    /// Anchor a root; any failure is logged and yields `None`
    pub async fn anchor_root(&self, job_id: &str, root: &str) -> Option<String> {
        if root.is_empty() {
            debug!("Job {} has no entries, skipping anchoring", job_id);
            return None;
        }

        let Some(anchor) = &self.anchor else {
            debug!("No anchor service configured, root for job {} left unanchored", job_id);
            return None;
        };

        match anchor.anchor(job_id, root).await {
            Ok(reference) => {
                info!("Anchored root for job {}: {}", job_id, reference);
                Some(reference)
            }
            Err(e) => {
                error!("Failed to anchor root for job {}: {}", job_id, e);
                None
            }
        }
    }

    /// Compute, anchor and record the job's summary
    pub async fn finalize(&self, job_id: &str) -> Result<FinalizedTrail> {
        let root = self.compute_merkle_root(job_id).await?;
        let transaction_ref = self.anchor_root(job_id, &root).await;
        let record_count = self.store.set_anchor_tx(job_id, transaction_ref.as_deref()).await?;
        let metadata = self.store.source_metadata(job_id).await?;

        let summary = LedgerEntry {
            job_id: job_id.to_string(),
            root_hash: root.clone(),
            anchor_tx: transaction_ref.clone(),
            timestamp: Utc::now(),
            record_count: record_count as u64,
            metadata: Some(metadata),
        };
        info!("Finalized audit trail: {}", summary.summary());
        self.store.put_ledger_entry(summary).await?;

        Ok(FinalizedTrail {
            root,
            transaction_ref,
        })
    }

    /// Whether the record's hash is present in the job's stored log.
    ///
    /// This trusts the local store; see [`AuditLedger::prove_inclusion`] for a
    /// path that can be checked against an independently obtained root.
    pub async fn verify_membership(&self, job_id: &str, record: &CompRecord) -> Result<bool> {
        let hash = hash_record(record)?;
        let present = self
            .store
            .record_hashes(job_id)
            .await?
            .iter()
            .any(|h| *h == hash);
        if !present {
            warn!("Record {} not found in audit log of job {}", hash, job_id);
        }
        Ok(present)
    }

    /// Inclusion path for the first occurrence of the record in the job's log
    pub async fn prove_inclusion(
        &self,
        job_id: &str,
        record: &CompRecord,
    ) -> Result<Option<MerkleProof>> {
        let hash = hash_record(record)?;
        let hashes = self.store.record_hashes(job_id).await?;
        match hashes.iter().position(|h| *h == hash) {
            Some(index) => {
                let proof = merkle_proof(&hashes, index)?;
                debug!("{} in job {}", proof.summary(), job_id);
                Ok(Some(proof))
            }
            None => Ok(None),
        }
    }

    /// Check an inclusion path against a root obtained outside this ledger
    pub fn verify_inclusion(proof: &MerkleProof, trusted_root: &str) -> bool {
        proof.verify(trusted_root)
    }

    /// Summary counts and entries for one job or every retained job
    pub async fn export_report(&self, job_id: Option<&str>) -> Result<AuditReport> {
        let entries = match job_id {
            Some(id) => self.store.entries(id).await?,
            None => self.store.all_entries().await?,
        };

        let jobs: BTreeSet<&str> = entries.iter().map(|e| e.job_id.as_str()).collect();
        let anchors: BTreeSet<&str> = entries.iter().filter_map(|e| e.anchor_tx.as_deref()).collect();
        let summary = ReportSummary {
            job_count: jobs.len(),
            total_entries: entries.len(),
            anchored_transactions: anchors.len(),
        };

        Ok(AuditReport { summary, entries })
    }

    pub async fn entries(&self, job_id: &str) -> Result<Vec<AuditLogEntry>> {
        self.store.entries(job_id).await
    }

    pub async fn ledger_entry(&self, job_id: &str) -> Result<Option<LedgerEntry>> {
        self.store.ledger_entry(job_id).await
    }

    /// Finalized summaries available for export
    pub async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.store.ledger_entries().await
    }
}
