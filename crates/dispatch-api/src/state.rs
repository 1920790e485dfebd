//! Shared application state handed to every route handler.
//!
//! Holds the live scheduling engine plus the narrow persistence interfaces
//! the core reads history and config through — no process-wide singletons,
//! per the redesign away from the original's module-level globals.

use dispatch_core::repository::{ConfigRepositoryTrait, JobRepositoryTrait, WorkerRepositoryTrait};
use dispatch_core::Dispatcher;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub job_repo: Arc<dyn JobRepositoryTrait>,
    pub worker_repo: Arc<dyn WorkerRepositoryTrait>,
    pub config_repo: Arc<dyn ConfigRepositoryTrait>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        job_repo: Arc<dyn JobRepositoryTrait>,
        worker_repo: Arc<dyn WorkerRepositoryTrait>,
        config_repo: Arc<dyn ConfigRepositoryTrait>,
    ) -> Self {
        Self {
            dispatcher,
            job_repo,
            worker_repo,
            config_repo,
        }
    }
}
