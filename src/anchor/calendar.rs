//! Timestamp Calendar Client
//!
//! Submits a root digest to an OpenTimestamps-style calendar server and keeps
//! the returned pending proof on disk.

use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::anchor::AnchorService;
use crate::audit::hashing::sha256_hex;
use crate::error::{LedgerError, Result};

const OTS_ACCEPT: &str = "application/vnd.opentimestamps.v1";

/// Calendar-backed anchor service
pub struct CalendarAnchor {
    calendar_url: String,
    proofs_path: PathBuf,
    http_client: Client,
}

impl CalendarAnchor {
    /// Create new calendar client
    pub fn new(
        calendar_url: impl Into<String>,
        proofs_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            calendar_url: calendar_url.into().trim_end_matches('/').to_string(),
            proofs_path: proofs_path.into(),
            http_client,
        })
    }

    /// Submit a 32-byte digest and return the calendar's pending proof
    pub async fn stamp(&self, digest: &[u8]) -> Result<Vec<u8>> {
        if digest.len() != 32 {
            return Err(LedgerError::Anchor(format!(
                "Digest must be 32 bytes, got {}",
                digest.len()
            )));
        }

        let url = format!("{}/digest", self.calendar_url);
        debug!("Submitting digest {} to {}", hex::encode(digest), url);

        let response = self
            .http_client
            .post(&url)
            .header(reqwest::header::ACCEPT, OTS_ACCEPT)
            .body(digest.to_vec())
            .send()
            .await
            .map_err(|e| LedgerError::Anchor(format!("Calendar request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Anchor(format!(
                "Calendar returned HTTP {}",
                status.as_u16()
            )));
        }

        let proof = response
            .bytes()
            .await
            .map_err(|e| LedgerError::Anchor(format!("Failed to read calendar response: {}", e)))?;

        if proof.is_empty() {
            return Err(LedgerError::Anchor("Calendar returned an empty proof".to_string()));
        }

        Ok(proof.to_vec())
    }

    /// Location of the proof file for a job's root
    pub fn proof_file(&self, job_id: &str, root: &str) -> PathBuf {
        let safe_id: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let prefix: String = root
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(16)
            .collect();
        self.proofs_path.join(format!("{}-{}.ots", safe_id, prefix))
    }

    async fn save_proof(&self, proof: &[u8], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LedgerError::Anchor(format!("Failed to create proofs directory: {}", e))
            })?;
        }

        tokio::fs::write(path, proof)
            .await
            .map_err(|e| LedgerError::Anchor(format!("Failed to write proof file: {}", e)))?;

        info!("Saved timestamp proof to: {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl AnchorService for CalendarAnchor {
    async fn anchor(&self, job_id: &str, root: &str) -> Result<String> {
        let digest = hex::decode(root)
            .map_err(|e| LedgerError::Anchor(format!("Root is not valid hex: {}", e)))?;

        let proof = self.stamp(&digest).await?;
        self.save_proof(&proof, &self.proof_file(job_id, root)).await?;

        Ok(format!("ots:{}", sha256_hex(&proof)))
    }
}
