//! One concurrent activity per dispatched job: performs the outbound call
//! bounded by a deadline, then drives the job to its next state.

use crate::client::WorkerClient;
use crate::config::SchedulerConfig;
use crate::job::{Job, JobStatus};
use crate::pool::WorkerPool;
use crate::queue::PriorityQueue;
use crate::repository::{JobRepositoryTrait, WorkerRepositoryTrait};
use crate::running::RunningSet;
use crate::wait_registry::WaitRegistry;
use crate::worker::Worker;
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Dependencies an executor activity needs; cloned (cheaply, all `Arc`s) per
/// in-flight job rather than threaded through as loose parameters.
#[derive(Clone)]
pub struct ExecutorContext {
    pub queue: Arc<PriorityQueue>,
    pub pool: Arc<WorkerPool>,
    pub running: Arc<RunningSet>,
    pub waiters: Arc<WaitRegistry>,
    pub config: Arc<ArcSwap<SchedulerConfig>>,
    pub job_repo: Arc<dyn JobRepositoryTrait>,
    pub worker_repo: Arc<dyn WorkerRepositoryTrait>,
}

/// Run one job to completion (success, exhausted-retry failure, or
/// timeout), always releasing the worker at the end regardless of outcome.
///
/// Preconditions: `job` is already `running` with `started_at`/`worker_id`
/// set, `worker` is already `busy`, and `ctx.running` already contains the
/// job — all committed atomically by the dispatcher before this is spawned.
pub async fn run(job: Job, worker: Worker, ctx: ExecutorContext) {
    let config = ctx.config.load_full();
    let deadline = Duration::from_secs(config.task_timeout);
    let client = WorkerClient::new(&worker.url, deadline);

    let outcome = tokio::time::timeout(
        deadline,
        client.submit_task(job.payload.clone(), worker.backend.as_deref()),
    )
    .await;

    match outcome {
        Ok(Ok(result)) => handle_success(job, &ctx, result).await,
        Ok(Err(e)) => handle_failure(job, &worker, &ctx, &config, e.to_string(), JobStatus::Failed).await,
        Err(_elapsed) => {
            handle_failure(
                job,
                &worker,
                &ctx,
                &config,
                "Task execution timeout".to_string(),
                JobStatus::Timeout,
            )
            .await
        }
    }

    ctx.pool.release(worker.id);
}

async fn handle_success(mut job: Job, ctx: &ExecutorContext, result: serde_json::Value) {
    // A concurrent cancel already removed the job from the running set;
    // this outcome is discarded rather than resurrecting a terminal job.
    if ctx.running.remove(job.id).is_none() {
        return;
    }
    job.mark_completed(result);
    if let Err(e) = ctx.job_repo.upsert(&job).await {
        warn!(job_id = %job.id, error = %e, "failed to persist completed job");
    }
    info!(job_id = %job.id, "job completed");
    ctx.waiters.signal(job);
}

/// Shared failure/timeout path: retries while attempts remain, otherwise
/// moves the job to its terminal status.
async fn handle_failure(
    mut job: Job,
    worker: &Worker,
    ctx: &ExecutorContext,
    config: &SchedulerConfig,
    error_message: String,
    terminal_status: JobStatus,
) {
    ctx.pool.increment_failed(worker.id);

    // A concurrent cancel already removed the job from the running set;
    // this outcome is discarded rather than resurrecting a terminal job.
    if ctx.running.remove(job.id).is_none() {
        return;
    }

    if job.retry_count < config.max_retries {
        job.mark_retrying();
        if let Err(e) = ctx.job_repo.upsert(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist retrying job");
        }
        warn!(job_id = %job.id, retry_count = job.retry_count, "job failed, scheduling retry");
        tokio::time::sleep(Duration::from_secs(config.retry_delay)).await;
        // Preserve the job's id and created_at so it keeps its age within
        // its priority band; duplicate rejection can't happen since the job
        // already left the queue and running set.
        if let Err(e) = ctx.queue.enqueue(job) {
            error!(error = %e, "failed to re-enqueue retried job");
        }
    } else {
        job.mark_terminal_failure(terminal_status, error_message);
        if let Err(e) = ctx.job_repo.upsert(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist terminal job");
        }
        error!(job_id = %job.id, status = %job.status, "job reached terminal failure");
        ctx.waiters.signal(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::repository::{ConfigRepositoryTrait, JobRepositoryTrait, WorkerRepositoryTrait};
    use crate::worker::Worker;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct NullJobRepo(StdMutex<Vec<Job>>);
    #[async_trait]
    impl JobRepositoryTrait for NullJobRepo {
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

    fn make_ctx() -> ExecutorContext {
        ExecutorContext {
            queue: Arc::new(PriorityQueue::new()),
            pool: Arc::new(WorkerPool::new()),
            running: Arc::new(RunningSet::new()),
            waiters: Arc::new(WaitRegistry::new()),
            config: Arc::new(ArcSwap::from_pointee(SchedulerConfig::default())),
            job_repo: Arc::new(NullJobRepo(StdMutex::new(vec![]))),
            worker_repo: Arc::new(NullWorkerRepo),
        }
    }

    #[tokio::test]
    async fn s2_sync_happy_path_completes_and_releases_worker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/file_parse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let ctx = make_ctx();
        let mut worker = Worker::new("w1".into(), server.uri(), None);
        worker.status = crate::worker::WorkerStatus::Busy;
        ctx.pool.add(worker.name.clone(), worker.url.clone(), None);
        let registered = ctx.pool.get_all().first().unwrap().clone();
        ctx.pool.set_status(registered.id, crate::worker::WorkerStatus::Busy).unwrap();

        let mut job = Job::new(
            serde_json::json!({"file_base64": "aGVsbG8=", "file_name": "a.pdf"}),
            5,
            None,
        );
        job.mark_running(registered.id, registered.name.clone());
        ctx.running.insert(job.clone());
        let rx = ctx.waiters.register(job.id);

        run(job, registered.clone(), ctx.clone()).await;

        let terminal = rx.await.unwrap();
        assert_eq!(terminal.status, JobStatus::Completed);
        assert_eq!(ctx.pool.get(registered.id).unwrap().status, crate::worker::WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn s4_execution_timeout_is_terminal_when_no_retries_remain() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/file_parse"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let ctx = make_ctx();
        ctx.config.store(Arc::new(SchedulerConfig {
            task_timeout: 1,
            max_retries: 0,
            ..SchedulerConfig::default()
        }));

        ctx.pool.add("w1".into(), server.uri(), None);
        let worker = ctx.pool.get_all().first().unwrap().clone();
        ctx.pool.set_status(worker.id, crate::worker::WorkerStatus::Busy).unwrap();

        let mut job = Job::new(serde_json::json!({"file_base64": "", "file_name": "a.pdf"}), 5, None);
        job.mark_running(worker.id, worker.name.clone());
        ctx.running.insert(job.clone());
        let rx = ctx.waiters.register(job.id);

        run(job, worker.clone(), ctx.clone()).await;

        let terminal = rx.await.unwrap();
        assert_eq!(terminal.status, JobStatus::Timeout);
        assert_eq!(terminal.error.as_deref(), Some("Task execution timeout"));
        assert_eq!(ctx.pool.get(worker.id).unwrap().failed_jobs, 1);
        assert_eq!(ctx.pool.get(worker.id).unwrap().status, crate::worker::WorkerStatus::Idle);
    }
}
