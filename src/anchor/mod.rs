//! Merkle Root Anchoring
//!
//! Publishes finalized audit roots to an external timestamp calendar so
//! their existence can be proven without trusting this service.

pub mod calendar;

pub use calendar::CalendarAnchor;

use async_trait::async_trait;

use crate::error::Result;

/// External registry that accepts a Merkle root and returns an opaque reference
#[async_trait]
pub trait AnchorService: Send + Sync {
    async fn anchor(&self, job_id: &str, root: &str) -> Result<String>;
}
