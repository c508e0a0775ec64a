//! Encrypted Export Service
//!
//! Seals finalized ledger entries for an external recipient:
//! AES-256-GCM over the canonical JSON of the entries, the content key
//! wrapped with RSA-OAEP/SHA-256 for the recipient, and the ciphertext
//! signed with RSA-PSS/SHA-256 by the service's own key.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce, Tag};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::{canonical_json, LedgerEntry};
use crate::config::ExportConfig;
use crate::error::{LedgerError, Result};
use crate::export::keys::{
    fingerprint, load_private_key, load_public_key, parse_private_key, parse_public_key,
};
use crate::export::package::{
    EncryptedLedgerExport, EncryptionParams, CIPHER_ALGORITHM, EXPORT_FORMAT_VERSION,
    KEY_WRAP_ALGORITHM,
};

/// AES-256-GCM with a 128-bit IV
type Aes256Gcm16 = AesGcm<Aes256, U16>;

const CONTENT_KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

pub struct EncryptedExportService {
    signing_key: RsaPrivateKey,
    signer_fingerprint: String,
    default_recipient: Option<RsaPublicKey>,
}

impl EncryptedExportService {
    pub fn new(signing_key: RsaPrivateKey, default_recipient: Option<RsaPublicKey>) -> Result<Self> {
        let signer_fingerprint = fingerprint(&RsaPublicKey::from(&signing_key))?;
        Ok(Self {
            signing_key,
            signer_fingerprint,
            default_recipient,
        })
    }

    /// Load keys from the configured PEM paths
    pub fn from_config(config: &ExportConfig) -> Result<Self> {
        let signing_key = load_private_key(&config.signing_key_path)?;
        let default_recipient = match &config.default_recipient_key_path {
            Some(path) => Some(load_public_key(path)?),
            None => None,
        };
        info!(
            "Export service ready (signing key {}, default recipient {})",
            config.signing_key_path.display(),
            if default_recipient.is_some() { "configured" } else { "none" }
        );
        Self::new(signing_key, default_recipient)
    }

    pub fn signer_fingerprint(&self) -> &str {
        &self.signer_fingerprint
    }

    /// Seal entries for the given recipient, or the configured default
    pub fn export_encrypted(
        &self,
        entries: &[LedgerEntry],
        recipient_public_key_pem: Option<&str>,
    ) -> Result<EncryptedLedgerExport> {
        let recipient = match recipient_public_key_pem {
            Some(pem) => parse_public_key(pem)?,
            None => self.default_recipient.clone().ok_or_else(|| {
                LedgerError::Config("No recipient key given and no default recipient configured".to_string())
            })?,
        };

        let plaintext = canonical_json(&serde_json::to_value(entries)?);

        let mut content_key = [0u8; CONTENT_KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut content_key);
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(&content_key));
        let mut ciphertext = plaintext.into_bytes();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut ciphertext)
            .map_err(|e| LedgerError::Crypto(format!("AES encrypt: {}", e)))?;

        let wrapped_key = recipient.encrypt(&mut OsRng, Oaep::new::<Sha256>(), &content_key)?;
        let signature = self.sign(&ciphertext);

        info!(
            "Sealed {} ledger entries ({} bytes ciphertext)",
            entries.len(),
            ciphertext.len()
        );

        Ok(EncryptedLedgerExport {
            version: EXPORT_FORMAT_VERSION,
            entry_count: entries.len(),
            created_at: Utc::now(),
            ciphertext: STANDARD.encode(&ciphertext),
            signature,
            signer_fingerprint: self.signer_fingerprint.clone(),
            encryption: EncryptionParams {
                algorithm: CIPHER_ALGORITHM.to_string(),
                iv: hex::encode(iv),
                auth_tag: hex::encode(tag.as_slice()),
                wrapped_key: STANDARD.encode(wrapped_key),
                key_wrap: KEY_WRAP_ALGORITHM.to_string(),
            },
        })
    }

    /// `export_encrypted` on the blocking pool
    pub async fn export_encrypted_async(
        service: Arc<Self>,
        entries: Vec<LedgerEntry>,
        recipient_public_key_pem: Option<String>,
    ) -> Result<EncryptedLedgerExport> {
        tokio::task::spawn_blocking(move || {
            service.export_encrypted(&entries, recipient_public_key_pem.as_deref())
        })
        .await
        .map_err(|e| LedgerError::Crypto(format!("Export task failed: {}", e)))?
    }

    /// Unwrap the content key, check the GCM tag and recover the entries
    pub fn decrypt_export(
        package: &EncryptedLedgerExport,
        recipient_private_key_pem: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let params = &package.encryption;
        if params.algorithm != CIPHER_ALGORITHM || params.key_wrap != KEY_WRAP_ALGORITHM {
            return Err(LedgerError::Crypto(format!(
                "Unsupported export scheme {} / {}",
                params.algorithm, params.key_wrap
            )));
        }

        let iv = decode_hex_exact("iv", &params.iv, IV_LEN)?;
        let tag = decode_hex_exact("auth_tag", &params.auth_tag, TAG_LEN)?;
        let wrapped_key = decode_base64("wrapped_key", &params.wrapped_key)?;
        let mut buffer = decode_base64("ciphertext", &package.ciphertext)?;

        let private_key = parse_private_key(recipient_private_key_pem)?;
        let content_key = private_key.decrypt(Oaep::new::<Sha256>(), &wrapped_key)?;
        if content_key.len() != CONTENT_KEY_LEN {
            return Err(LedgerError::Crypto("Unwrapped content key has wrong length".to_string()));
        }

        let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(&content_key));
        cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&iv),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| LedgerError::Crypto("Authentication tag mismatch".to_string()))?;

        let entries: Vec<LedgerEntry> = serde_json::from_slice(&buffer)?;
        if entries.len() != package.entry_count {
            warn!(
                "Export declares {} entries but carries {}",
                package.entry_count,
                entries.len()
            );
        }
        debug!("Decrypted {} ledger entries", entries.len());
        Ok(entries)
    }

    /// Check the package signature against the signer's public key
    pub fn verify_export(package: &EncryptedLedgerExport, signer_public_key_pem: &str) -> Result<bool> {
        let ciphertext = decode_base64("ciphertext", &package.ciphertext)?;
        Self::verify_signature(&ciphertext, &package.signature, signer_public_key_pem)
    }

    /// RSA-PSS/SHA-256 signature over `data`, base64
    pub fn sign(&self, data: &[u8]) -> String {
        let signing_key = SigningKey::<Sha256>::new(self.signing_key.clone());
        let signature = signing_key.sign_with_rng(&mut OsRng, data);
        STANDARD.encode(signature.to_bytes())
    }

    /// Verify a base64 RSA-PSS/SHA-256 signature; a malformed signature is
    /// reported as `false`, a malformed key as an error
    pub fn verify_signature(data: &[u8], signature_b64: &str, public_key_pem: &str) -> Result<bool> {
        let public_key = parse_public_key(public_key_pem)?;
        let Ok(bytes) = STANDARD.decode(signature_b64) else {
            return Ok(false);
        };
        let Ok(signature) = Signature::try_from(bytes.as_slice()) else {
            return Ok(false);
        };
        Ok(VerifyingKey::<Sha256>::new(public_key)
            .verify(data, &signature)
            .is_ok())
    }
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| LedgerError::Crypto(format!("Invalid base64 in {}: {}", field, e)))
}

fn decode_hex_exact(field: &str, value: &str, len: usize) -> Result<Vec<u8>> {
    let bytes = hex::decode(value)
        .map_err(|e| LedgerError::Crypto(format!("Invalid hex in {}: {}", field, e)))?;
    if bytes.len() != len {
        return Err(LedgerError::Crypto(format!(
            "{} must be {} bytes, got {}",
            field,
            len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LedgerMetadata;
    use crate::export::keys::test_keys::{recipient, signer};
    use std::collections::BTreeMap;

    fn service() -> EncryptedExportService {
        EncryptedExportService::new(parse_private_key(&signer().private_key_pem).unwrap(), None).unwrap()
    }

    fn entries() -> Vec<LedgerEntry> {
        let mut source_counts = BTreeMap::new();
        source_counts.insert("sales_2023".to_string(), 2);
        vec![
            LedgerEntry {
                job_id: "job-1".to_string(),
                root_hash: "ab".repeat(32),
                anchor_tx: Some("ots:1234".to_string()),
                timestamp: Utc::now(),
                record_count: 2,
                metadata: Some(LedgerMetadata {
                    source_counts,
                    file_count: 1,
                }),
            },
            LedgerEntry {
                job_id: "job-2".to_string(),
                root_hash: String::new(),
                anchor_tx: None,
                timestamp: Utc::now(),
                record_count: 0,
                metadata: None,
            },
        ]
    }

    #[test]
    fn test_round_trip_carries_no_plaintext() {
        let service = service();
        let entries = entries();
        let package = service
            .export_encrypted(&entries, Some(&recipient().public_key_pem))
            .unwrap();

        assert_eq!(package.entry_count, 2);
        assert_eq!(package.encryption.iv.len(), 32);
        assert_eq!(package.encryption.auth_tag.len(), 32);
        assert!(!package.to_json().unwrap().contains("job-1"));

        let decrypted =
            EncryptedExportService::decrypt_export(&package, &recipient().private_key_pem).unwrap();
        assert_eq!(decrypted, entries);
        assert!(EncryptedExportService::verify_export(&package, &signer().public_key_pem).unwrap());
    }

    #[test]
    fn test_tampered_ciphertext_fails_tag_and_signature() {
        let service = service();
        let mut package = service
            .export_encrypted(&entries(), Some(&recipient().public_key_pem))
            .unwrap();

        let mut bytes = STANDARD.decode(&package.ciphertext).unwrap();
        bytes[0] ^= 0x01;
        package.ciphertext = STANDARD.encode(&bytes);

        let err = EncryptedExportService::decrypt_export(&package, &recipient().private_key_pem)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Crypto(msg) if msg.contains("tag")));
        assert!(!EncryptedExportService::verify_export(&package, &signer().public_key_pem).unwrap());
    }

    #[test]
    fn test_wrong_private_key_cannot_decrypt() {
        let service = service();
        let package = service
            .export_encrypted(&entries(), Some(&recipient().public_key_pem))
            .unwrap();
        assert!(EncryptedExportService::decrypt_export(&package, &signer().private_key_pem).is_err());
    }

    #[test]
    fn test_missing_recipient_is_config_error() {
        let err = service().export_encrypted(&entries(), None).unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn test_default_recipient_is_used() {
        let service = EncryptedExportService::new(
            parse_private_key(&signer().private_key_pem).unwrap(),
            Some(parse_public_key(&recipient().public_key_pem).unwrap()),
        )
        .unwrap();
        let package = service.export_encrypted(&entries(), None).unwrap();
        assert_eq!(
            EncryptedExportService::decrypt_export(&package, &recipient().private_key_pem)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_sign_and_verify_signature() {
        let service = service();
        let signature = service.sign(b"ledger bytes");
        let public_pem = &signer().public_key_pem;

        assert!(EncryptedExportService::verify_signature(b"ledger bytes", &signature, public_pem).unwrap());
        assert!(!EncryptedExportService::verify_signature(b"ledger bytez", &signature, public_pem).unwrap());
        assert!(!EncryptedExportService::verify_signature(b"ledger bytes", "%%%", public_pem).unwrap());
        assert!(!EncryptedExportService::verify_signature(
            b"ledger bytes",
            &signature,
            &recipient().public_key_pem
        )
        .unwrap());
    }

    #[test]
    fn test_truncated_iv_is_rejected() {
        let service = service();
        let mut package = service
            .export_encrypted(&entries(), Some(&recipient().public_key_pem))
            .unwrap();
        package.encryption.iv.truncate(24);
        let err = EncryptedExportService::decrypt_export(&package, &recipient().private_key_pem)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Crypto(msg) if msg.contains("iv")));
    }

    #[tokio::test]
    async fn test_async_export_matches_signer() {
        let service = Arc::new(service());
        let package = EncryptedExportService::export_encrypted_async(
            Arc::clone(&service),
            entries(),
            Some(recipient().public_key_pem.clone()),
        )
        .await
        .unwrap();
        assert_eq!(package.signer_fingerprint, service.signer_fingerprint());
    }
}
