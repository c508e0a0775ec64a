//! Export recipient descriptors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{LedgerError, Result};

/// Delivery parameters for one recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientSettings {
    pub provider: String,
    pub bucket: String,
    /// Free-form delivery schedule, e.g. a cron expression
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientConfig {
    pub label: String,
    #[serde(flatten)]
    pub settings: RecipientSettings,
    pub created_at: DateTime<Utc>,
}

fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(LedgerError::missing_field("label"));
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(LedgerError::InvalidInput(format!(
            "Recipient label may only contain letters, digits, '_' and '-': {}",
            label
        )));
    }
    Ok(())
}

/// Write `<recipients_dir>/<label>.json`, replacing any previous descriptor
pub fn create_recipient_config(
    recipients_dir: &Path,
    label: &str,
    settings: RecipientSettings,
) -> Result<PathBuf> {
    validate_label(label)?;
    std::fs::create_dir_all(recipients_dir)?;

    let config = RecipientConfig {
        label: label.to_string(),
        settings,
        created_at: Utc::now(),
    };
    let path = recipients_dir.join(format!("{}.json", label));
    std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;

    info!("Saved recipient {} to {}", label, path.display());
    Ok(path)
}

pub fn load_recipient_config(recipients_dir: &Path, label: &str) -> Result<RecipientConfig> {
    validate_label(label)?;
    let path = recipients_dir.join(format!("{}.json", label));
    let json = std::fs::read_to_string(&path)
        .map_err(|_| LedgerError::NotFound(format!("Recipient {}", label)))?;
    Ok(serde_json::from_str(&json)?)
}
