//! Persistence traits the core reads configuration and history through.
//!
//! The core is authoritative only for *live* state (the queue, the pool,
//! the running set); these traits back the history/config tables named in
//! the external-interfaces contract and are database-agnostic the way the
//! product/customer repository traits are in the wider codebase this crate
//! was split out of.

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::job::{Job, JobStatus};
use crate::worker::Worker;
use async_trait::async_trait;
use uuid::Uuid;

/// Config key-value persistence: one JSON-encoded row per config key.
#[async_trait]
pub trait ConfigRepositoryTrait: Send + Sync + 'static {
    async fn load(&self) -> Result<SchedulerConfig>;
    async fn save(&self, config: &SchedulerConfig) -> Result<()>;
}

/// Worker registry persistence.
#[async_trait]
pub trait WorkerRepositoryTrait: Send + Sync + 'static {
    async fn list(&self) -> Result<Vec<Worker>>;
    async fn upsert(&self, worker: &Worker) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    async fn update_enabled(&self, id: Uuid, enabled: bool) -> Result<()>;
    async fn update_stats(&self, id: Uuid, total_jobs: u64, failed_jobs: u64) -> Result<()>;
}

/// Job history persistence (excludes large binary payload fields).
#[async_trait]
pub trait JobRepositoryTrait: Send + Sync + 'static {
    async fn upsert(&self, job: &Job) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>>;
    async fn list_by_status(&self, status: JobStatus, page: u32, page_size: u32) -> Result<Vec<Job>>;
    async fn list_failed(&self) -> Result<Vec<Job>>;
}
