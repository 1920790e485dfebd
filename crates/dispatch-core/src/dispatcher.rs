//! The long-running dispatch loop: pairs idle workers to head-of-queue jobs,
//! sweeps queue-time expiries, and runs the worker-pool health check on its
//! own cadence.
//!
//! Pairing is committed through [`WorkerPool::try_bind_idle`], the single
//! point that marks a worker `busy` and returns it bound. If the job cannot
//! be recorded as running afterward (never expected in practice, but the pool
//! and running set are independent structures), the job is restored to the
//! head of the queue rather than dropped.

use crate::config::SchedulerConfig;
use crate::executor::{self, ExecutorContext};
use crate::job::{Job, JobStatus};
use crate::pool::WorkerPool;
use crate::queue::PriorityQueue;
use crate::repository::{JobRepositoryTrait, WorkerRepositoryTrait};
use crate::running::RunningSet;
use crate::wait_registry::WaitRegistry;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Cadence of the dispatch loop's pairing/sweep iteration.
const DISPATCH_TICK: Duration = Duration::from_millis(500);

/// Owns the live scheduling state and drives the dispatch and health-check
/// activities. Constructed once by the bootstrap layer and shared (via
/// `Arc`) with the HTTP adapter for submission, listing and cancellation.
pub struct Dispatcher {
    pub queue: Arc<PriorityQueue>,
    pub pool: Arc<WorkerPool>,
    pub running: Arc<RunningSet>,
    pub waiters: Arc<WaitRegistry>,
    pub config: Arc<ArcSwap<SchedulerConfig>>,
    job_repo: Arc<dyn JobRepositoryTrait>,
    worker_repo: Arc<dyn WorkerRepositoryTrait>,
    shutdown: Notify,
}

impl Dispatcher {
    pub fn new(
        config: SchedulerConfig,
        job_repo: Arc<dyn JobRepositoryTrait>,
        worker_repo: Arc<dyn WorkerRepositoryTrait>,
    ) -> Self {
        Self {
            queue: Arc::new(PriorityQueue::new()),
            pool: Arc::new(WorkerPool::new()),
            running: Arc::new(RunningSet::new()),
            waiters: Arc::new(WaitRegistry::new()),
            config: Arc::new(ArcSwap::from_pointee(config)),
            job_repo,
            worker_repo,
            shutdown: Notify::new(),
        }
    }

    fn executor_context(&self) -> ExecutorContext {
        ExecutorContext {
            queue: self.queue.clone(),
            pool: self.pool.clone(),
            running: self.running.clone(),
            waiters: self.waiters.clone(),
            config: self.config.clone(),
            job_repo: self.job_repo.clone(),
            worker_repo: self.worker_repo.clone(),
        }
    }

    /// Submit a job for dispatch. Rejects with `QueueFull` once the queue is
    /// at `max_queue_size`. Returns the job's 1-based queue position.
    ///
    /// If `enable_priority` is off, the submitted priority is overridden to
    /// the default band regardless of what the caller requested, matching
    /// the original's `priority if cfg.enable_priority else 5`.
    pub fn submit(&self, mut job: Job) -> crate::error::Result<usize> {
        let config = self.config.load();
        if self.queue.size() >= config.max_queue_size {
            return Err(crate::error::Error::QueueFull);
        }
        if !config.enable_priority {
            job.priority = crate::job::DEFAULT_PRIORITY;
        }
        self.queue.enqueue(job)
    }

    /// Resolve `id` against every live-state location: queue, running set,
    /// nothing (the adapter falls back to history for terminal jobs).
    pub fn find_live(&self, id: uuid::Uuid) -> Option<Job> {
        self.queue.get(id).or_else(|| self.running.get(id))
    }

    /// Cancel a job per §4.7. Returns `Ok(job)` with the terminal record, or
    /// `Err(JobNotFound)` if the id is in neither the queue nor the running
    /// set (already terminal, or never existed).
    pub async fn cancel(&self, id: uuid::Uuid) -> crate::error::Result<Job> {
        if let Some(mut job) = self.queue.remove(id) {
            job.mark_cancelled();
            if let Err(e) = self.job_repo.upsert(&job).await {
                warn!(job_id = %id, error = %e, "failed to persist cancelled job");
            }
            self.waiters.signal(job.clone());
            return Ok(job);
        }
        if let Some(job) = self.running.mark_cancelled(id) {
            if let Err(e) = self.job_repo.upsert(&job).await {
                warn!(job_id = %id, error = %e, "failed to persist cancelled job");
            }
            self.waiters.signal(job.clone());
            return Ok(job);
        }
        Err(crate::error::Error::JobNotFound(id))
    }

    /// Signal the dispatch and health-check loops to stop after their
    /// current iteration; in-flight executors are not interrupted.
    pub fn request_shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Run the dispatch loop until [`Self::request_shutdown`] is called.
    pub async fn run(self: Arc<Self>) {
        info!("dispatcher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(DISPATCH_TICK) => {
                    self.drain_pairings();
                    self.sweep_expired().await;
                }
                _ = self.shutdown.notified() => {
                    info!("dispatcher shutting down");
                    return;
                }
            }
        }
    }

    /// Run the periodic worker health probe until shutdown, at
    /// `health_check_interval` cadence (read fresh each iteration, so a
    /// config update takes effect on the next probe).
    pub async fn run_health_check(self: Arc<Self>) {
        info!("health-check loop started");
        loop {
            let interval = Duration::from_secs(self.config.load().health_check_interval);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let timeout = Duration::from_secs(self.config.load().instance_timeout);
                    self.pool.health_check(timeout).await;
                    for worker in self.pool.get_all() {
                        if let Err(e) = self.worker_repo.update_stats(worker.id, worker.total_jobs, worker.failed_jobs).await {
                            warn!(worker_id = %worker.id, error = %e, "failed to persist worker stats after health check");
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("health-check loop shutting down");
                    return;
                }
            }
        }
    }

    /// Pair as many (idle worker, head-of-queue job) as currently possible.
    ///
    /// `pub` so integration tests can force a pairing tick deterministically
    /// rather than sleeping for the full dispatch cadence.
    pub fn drain_pairings(&self) {
        loop {
            if self.queue.is_empty() {
                return;
            }
            let Some(job) = self.queue.dequeue() else {
                return;
            };
            let Some(worker) = self.pool.try_bind_idle(job.id) else {
                // No idle worker became available between the emptiness
                // check and the pop; restore the job ahead of its peers.
                self.queue.enqueue_at_head(job);
                return;
            };
            self.dispatch_one(job, worker);
        }
    }

    /// Commit the binding (job running + running-set membership) and spawn
    /// its executor. If the job cannot be admitted to the running set for
    /// any reason, the worker is released and the job restored to the head
    /// of the queue rather than lost.
    fn dispatch_one(&self, mut job: Job, worker: crate::worker::Worker) {
        job.mark_running(worker.id, worker.name.clone());
        self.running.insert(job.clone());
        self.pool.increment_total(worker.id);

        debug!(job_id = %job.id, worker_id = %worker.id, "dispatched");

        let ctx = self.executor_context();
        let job_repo = self.job_repo.clone();
        let persisted = job.clone();
        tokio::spawn(async move {
            if let Err(e) = job_repo.upsert(&persisted).await {
                warn!(job_id = %persisted.id, error = %e, "failed to persist running job");
            }
            executor::run(job, worker, ctx).await;
        });
    }

    /// Expire queue-resident jobs whose age exceeds `queue_timeout`.
    async fn sweep_expired(&self) {
        let queue_timeout = chrono::Duration::seconds(self.config.load().queue_timeout as i64);
        for mut job in self.queue.sweep_expired(queue_timeout) {
            job.mark_terminal_failure(JobStatus::Timeout, "Queue timeout".to_string());
            if let Err(e) = self.job_repo.upsert(&job).await {
                warn!(job_id = %job.id, error = %e, "failed to persist queue-expired job");
            }
            warn!(job_id = %job.id, "job expired in queue");
            self.waiters.signal(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{ConfigRepositoryTrait, WorkerRepositoryTrait};
    use crate::worker::Worker;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct MemJobRepo(StdMutex<Vec<Job>>);
    #[async_trait]
    impl JobRepositoryTrait for MemJobRepo {
        async fn upsert(&self, job: &Job) -> crate::error::Result<()> {
            self.0.lock().unwrap().push(job.clone());
            Ok(())
        }
        async fn find_by_id(&self, _id: Uuid) -> crate::error::Result<Option<Job>> {
            Ok(None)
        }
        async fn list_by_status(
            &self,
            _status: JobStatus,
            _page: u32,
            _page_size: u32,
        ) -> crate::error::Result<Vec<Job>> {
            Ok(vec![])
        }
        async fn list_failed(&self) -> crate::error::Result<Vec<Job>> {
            Ok(vec![])
        }
    }

    struct NullWorkerRepo;
    #[async_trait]
    impl WorkerRepositoryTrait for NullWorkerRepo {
        async fn list(&self) -> crate::error::Result<Vec<Worker>> {
            Ok(vec![])
        }
        async fn upsert(&self, _w: &Worker) -> crate::error::Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: Uuid) -> crate::error::Result<()> {
            Ok(())
        }
        async fn update_enabled(&self, _id: Uuid, _enabled: bool) -> crate::error::Result<()> {
            Ok(())
        }
        async fn update_stats(&self, _id: Uuid, _t: u64, _f: u64) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[allow(dead_code)]
    struct NullConfigRepo;
    #[async_trait]
    impl ConfigRepositoryTrait for NullConfigRepo {
        async fn load(&self) -> crate::error::Result<SchedulerConfig> {
            Ok(SchedulerConfig::default())
        }
        async fn save(&self, _c: &SchedulerConfig) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn make_dispatcher(config: SchedulerConfig) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            config,
            Arc::new(MemJobRepo::default()),
            Arc::new(NullWorkerRepo),
        ))
    }

    #[tokio::test]
    async fn s2_sync_happy_path_dispatches_and_completes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/file_parse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let dispatcher = make_dispatcher(SchedulerConfig {
            task_timeout: 60,
            ..SchedulerConfig::default()
        });
        dispatcher.pool.add("w1".into(), server.uri(), None);
        dispatcher.pool.set_status(
            dispatcher.pool.get_all()[0].id,
            crate::worker::WorkerStatus::Idle,
        ).unwrap();

        let job = Job::new(
            serde_json::json!({"file_base64": "aGVsbG8=", "file_name": "a.pdf"}),
            5,
            None,
        );
        let rx = dispatcher.waiters.register(job.id);
        dispatcher.submit(job).unwrap();

        dispatcher.drain_pairings();
        let terminal = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("job should complete before timeout")
            .unwrap();

        assert_eq!(terminal.status, JobStatus::Completed);
        let worker = dispatcher.pool.get_all().into_iter().next().unwrap();
        assert_eq!(worker.status, crate::worker::WorkerStatus::Idle);
        assert_eq!(worker.total_jobs, 1);
    }

    #[test]
    fn disabled_priority_forces_default_band() {
        let dispatcher = make_dispatcher(SchedulerConfig {
            enable_priority: false,
            ..SchedulerConfig::default()
        });
        let job = Job::new(serde_json::json!({}), 9, None);
        let id = job.id;
        dispatcher.submit(job).unwrap();
        assert_eq!(dispatcher.queue.get(id).unwrap().priority, crate::job::DEFAULT_PRIORITY);
    }

    #[test]
    fn queue_full_rejects_submission() {
        let dispatcher = make_dispatcher(SchedulerConfig {
            max_queue_size: 1,
            ..SchedulerConfig::default()
        });
        dispatcher.submit(Job::new(serde_json::json!({}), 5, None)).unwrap();
        let err = dispatcher
            .submit(Job::new(serde_json::json!({}), 5, None))
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::QueueFull));
    }

    #[tokio::test]
    async fn s5_queue_expiry_with_no_idle_workers() {
        let dispatcher = make_dispatcher(SchedulerConfig {
            queue_timeout: 60,
            ..SchedulerConfig::default()
        });
        let mut job = Job::new(serde_json::json!({}), 5, None);
        job.created_at = chrono::Utc::now() - chrono::Duration::seconds(100);
        let rx = dispatcher.waiters.register(job.id);
        dispatcher.submit(job).unwrap();

        dispatcher.drain_pairings();
        dispatcher.sweep_expired().await;

        let terminal = rx.await.unwrap();
        assert_eq!(terminal.status, JobStatus::Timeout);
        assert_eq!(terminal.error.as_deref(), Some("Queue timeout"));
        assert_eq!(dispatcher.queue.size(), 0);
    }

    #[tokio::test]
    async fn s6_cancel_running_job_discards_in_flight_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/file_parse"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let dispatcher = make_dispatcher(SchedulerConfig {
            task_timeout: 60,
            ..SchedulerConfig::default()
        });
        dispatcher.pool.add("w1".into(), server.uri(), None);
        dispatcher.pool.set_status(
            dispatcher.pool.get_all()[0].id,
            crate::worker::WorkerStatus::Idle,
        ).unwrap();

        let job = Job::new(serde_json::json!({"file_base64": "", "file_name": "a.pdf"}), 5, None);
        let id = job.id;
        let rx = dispatcher.waiters.register(id);
        dispatcher.submit(job).unwrap();
        dispatcher.drain_pairings();

        assert!(dispatcher.running.contains(id));
        let cancelled = dispatcher.cancel(id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(!dispatcher.running.contains(id));

        let terminal = rx.await.unwrap();
        assert_eq!(terminal.status, JobStatus::Cancelled);

        // let the in-flight mocked call finish; it must not resurrect the job
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!dispatcher.running.contains(id));
    }

    #[test]
    fn cancel_unknown_job_returns_not_found() {
        let dispatcher = make_dispatcher(SchedulerConfig::default());
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt.block_on(dispatcher.cancel(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, crate::error::Error::JobNotFound(_)));
    }
}
