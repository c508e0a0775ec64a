//! Bulk comp import: job model, registry, worker process and scheduling

pub mod events;
pub mod job;
pub mod orchestrator;
pub mod store;
pub mod worker;

#[cfg(all(test, unix))]
pub(crate) mod test_worker;

pub use events::JobEvent;
pub use job::{ImportJob, JobStatus, NewImportJob};
pub use orchestrator::ImportOrchestrator;
pub use store::{InMemoryJobStore, JobStore};
