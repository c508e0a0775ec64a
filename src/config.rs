//! Application configuration
//!
//! Built-in defaults, overridden by an optional TOML file and then by
//! `COMP_LEDGER__SECTION__KEY` environment variables.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{LedgerError, Result};

pub const CONFIG_PATH_VAR: &str = "COMP_LEDGER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "comp-ledger.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub anchor: AnchorConfig,
    pub export: ExportConfig,
}

/// External import worker invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub binary_path: PathBuf,
    pub stream_flag: String,
    pub extra_args: Vec<String>,
    pub max_concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("bin/comp-import-worker"),
            stream_flag: "--stream".to_string(),
            extra_args: Vec::new(),
            max_concurrency: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    pub enabled: bool,
    pub calendar_url: String,
    pub proofs_path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            calendar_url: "https://alice.btc.calendar.opentimestamps.org".to_string(),
            proofs_path: PathBuf::from("data/proofs"),
            timeout_secs: 30,
        }
    }
}

impl AnchorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// PKCS#8 PEM private key used to sign exports
    pub signing_key_path: PathBuf,
    /// SPKI PEM public key used when no recipient key is given
    pub default_recipient_key_path: Option<PathBuf>,
    pub recipients_path: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            signing_key_path: PathBuf::from("keys/ledger-signing.key.pem"),
            default_recipient_key_path: None,
            recipients_path: PathBuf::from("data/recipients"),
        }
    }
}

impl AppConfig {
    /// Load from `COMP_LEDGER_CONFIG` (or `comp-ledger.toml`) plus environment
    pub fn load() -> Result<Self> {
        let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load with the given file as the optional file layer
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix("COMP_LEDGER")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("worker.extra_args"),
            )
            .build()
            .map_err(|e| LedgerError::Config(format!("Failed to load {:?}: {}", path, e)))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| LedgerError::Config(format!("Failed to parse {:?}: {}", path, e)))?;

        config.validate()?;
        info!("Configuration loaded (file layer: {:?})", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.max_concurrency == 0 {
            return Err(LedgerError::Config(
                "worker.max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.worker.binary_path.as_os_str().is_empty() {
            return Err(LedgerError::Config("worker.binary_path is empty".to_string()));
        }

        if self.anchor.enabled && self.anchor.calendar_url.trim().is_empty() {
            return Err(LedgerError::Config(
                "anchor.calendar_url is required when anchoring is enabled".to_string(),
            ));
        }

        Ok(())
    }
}
