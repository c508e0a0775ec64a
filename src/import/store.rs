//! Import Job Storage

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{LedgerError, Result};
use crate::import::job::ImportJob;

/// Storage abstraction for the job registry
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: ImportJob) -> Result<()>;
    async fn update(&self, job: ImportJob) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ImportJob>>;
    async fn remove(&self, id: &str) -> Result<Option<ImportJob>>;

    /// All jobs in submission order
    async fn list(&self) -> Result<Vec<ImportJob>>;

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ImportJob>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|job| job.owner_id == owner_id)
            .collect())
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, ImportJob>,
    order: Vec<String>,
}

/// Process-local job registry
#[derive(Default)]
pub struct InMemoryJobStore {
    registry: RwLock<Registry>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: ImportJob) -> Result<()> {
        let mut registry = self.registry.write().await;
        if registry.jobs.contains_key(&job.id) {
            return Err(LedgerError::Repository(format!("Job {} already exists", job.id)));
        }
        registry.order.push(job.id.clone());
        registry.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn update(&self, job: ImportJob) -> Result<()> {
        let mut registry = self.registry.write().await;
        match registry.jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job;
                Ok(())
            }
            None => Err(LedgerError::job_not_found(&job.id)),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<ImportJob>> {
        Ok(self.registry.read().await.jobs.get(id).cloned())
    }

    async fn remove(&self, id: &str) -> Result<Option<ImportJob>> {
        let mut registry = self.registry.write().await;
        let removed = registry.jobs.remove(id);
        if removed.is_some() {
            registry.order.retain(|existing| existing != id);
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<ImportJob>> {
        let registry = self.registry.read().await;
        Ok(registry
            .order
            .iter()
            .filter_map(|id| registry.jobs.get(id).cloned())
            .collect())
    }
}
