use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<rsa::Error> for LedgerError {
    fn from(err: rsa::Error) -> Self {
        Self::Crypto(format!("RSA error: {}", err))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to spawn import worker: {0}")]
    WorkerSpawn(String),

    #[error("{0}")]
    WorkerExit(String),

    #[error("Anchor service error: {0}")]
    Anchor(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    pub fn missing_field(field: &str) -> Self {
        Self::InvalidInput(format!("Missing required field: {}", field))
    }

    pub fn exit_code(code: i32) -> Self {
        Self::WorkerExit(format!("Import worker exited with code {}", code))
    }

    pub fn terminated_by_signal() -> Self {
        Self::WorkerExit("Import worker terminated by signal".to_string())
    }

    pub fn job_not_found(id: &str) -> Self {
        Self::NotFound(format!("Import job {}", id))
    }
}
