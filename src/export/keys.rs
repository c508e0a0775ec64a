//! RSA key material for export signing and key wrapping

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{LedgerError, Result};

pub const KEY_BITS: usize = 2048;

/// PEM-encoded RSA key pair: SPKI public key, PKCS#8 private key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPairPem {
    pub label: String,
    pub public_key_pem: String,
    pub private_key_pem: String,
}

impl KeyPairPem {
    pub fn public_key_file(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.pub.pem", self.label))
    }

    pub fn private_key_file(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.key.pem", self.label))
    }

    /// Persist as `<label>.pub.pem` and `<label>.key.pem` under `dir`
    pub fn write_key_pair(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let public_path = self.public_key_file(dir);
        let private_path = self.private_key_file(dir);
        std::fs::write(&public_path, &self.public_key_pem)?;
        std::fs::write(&private_path, &self.private_key_pem)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&private_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!("Wrote key pair {} to {}", self.label, dir.display());
        Ok((public_path, private_path))
    }
}

/// Generate a 2048-bit RSA key pair
pub fn generate_key_pair(label: &str) -> Result<KeyPairPem> {
    let label = label.trim();
    if label.is_empty() {
        return Err(LedgerError::missing_field("label"));
    }

    let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS)?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| LedgerError::Crypto(format!("Failed to encode private key: {}", e)))?
        .as_str()
        .to_owned();
    let public_key_pem = encode_public_key(&public_key)?;

    info!("Generated {}-bit key pair {}", KEY_BITS, label);
    Ok(KeyPairPem {
        label: label.to_string(),
        public_key_pem,
        private_key_pem,
    })
}

pub fn encode_public_key(key: &RsaPublicKey) -> Result<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| LedgerError::Crypto(format!("Failed to encode public key: {}", e)))
}

pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .map_err(|e| LedgerError::Crypto(format!("Invalid private key: {}", e)))
}

pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| LedgerError::Crypto(format!("Invalid public key: {}", e)))
}

fn read_key_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        LedgerError::Config(format!("Cannot read key file {}: {}", path.display(), e))
    })
}

/// Load a PKCS#8 private key; a missing file is a configuration error
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    parse_private_key(&read_key_file(path)?)
}

/// Load an SPKI public key; a missing file is a configuration error
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    parse_public_key(&read_key_file(path)?)
}

/// SHA-256 hex of the SPKI DER encoding
pub fn fingerprint(key: &RsaPublicKey) -> Result<String> {
    let der = key
        .to_public_key_der()
        .map_err(|e| LedgerError::Crypto(format!("Failed to encode public key: {}", e)))?;
    Ok(hex::encode(Sha256::digest(der.as_bytes())))
}
