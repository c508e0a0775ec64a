//! Encrypted export of finalized ledger entries

pub mod keys;
pub mod package;
pub mod recipient;
pub mod service;

pub use keys::{generate_key_pair, KeyPairPem};
pub use package::{EncryptedLedgerExport, EncryptionParams};
pub use recipient::{create_recipient_config, RecipientConfig, RecipientSettings};
pub use service::EncryptedExportService;
