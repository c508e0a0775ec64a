//! Import Audit Ledger
//!
//! Tamper-evident, order-sensitive commitments over every record imported
//! by a job, with Merkle roots anchored to an external calendar.

pub mod entry;
pub mod hashing;
pub mod ledger;
pub mod merkle;
pub mod store;

pub use entry::{AuditLogEntry, AuditReport, FinalizedTrail, LedgerEntry, LedgerMetadata};
pub use hashing::{canonical_json, hash_pair, hash_record};
pub use ledger::AuditLedger;
pub use merkle::{merkle_proof, merkle_root, verify_merkle_root, MerkleProof};
pub use store::{AuditLogStore, InMemoryAuditLogStore};
