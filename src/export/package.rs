//! Encrypted export package format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EXPORT_FORMAT_VERSION: u32 = 1;
pub const CIPHER_ALGORITHM: &str = "AES-256-GCM";
pub const KEY_WRAP_ALGORITHM: &str = "RSA-OAEP-SHA256";

/// Parameters needed to decrypt `EncryptedLedgerExport::ciphertext`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionParams {
    pub algorithm: String,
    /// 16-byte IV, hex
    pub iv: String,
    /// 16-byte GCM tag, hex
    pub auth_tag: String,
    /// Content key wrapped for the recipient, base64
    pub wrapped_key: String,
    pub key_wrap: String,
}

/// Ledger entries sealed for one recipient.
///
/// Only ciphertext travels; entries are recovered with the recipient's
/// private key. The signature covers the ciphertext bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedLedgerExport {
    pub version: u32,
    pub entry_count: usize,
    pub created_at: DateTime<Utc>,
    /// base64
    pub ciphertext: String,
    /// RSA-PSS/SHA-256 over the ciphertext, base64
    pub signature: String,
    pub signer_fingerprint: String,
    pub encryption: EncryptionParams,
}

impl EncryptedLedgerExport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
