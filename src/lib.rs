pub mod anchor;
pub mod audit;
pub mod comp;
pub mod config;
pub mod error;
pub mod export;
pub mod import;

pub use error::LedgerError;
