//! Registry of remote workers: concurrency-safe mutation, idle selection,
//! and periodic health probing.

use crate::error::{Error, Result};
use crate::worker::{normalize_url, Worker, WorkerId, WorkerStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

struct Inner {
    workers: HashMap<WorkerId, Worker>,
    /// Insertion order, for deterministic `select_idle` scanning.
    order: Vec<WorkerId>,
}

/// Registry of workers behind a single non-reentrant mutex.
pub struct WorkerPool {
    inner: Mutex<Inner>,
    http: reqwest::Client,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                workers: HashMap::new(),
                order: Vec::new(),
            }),
            http: reqwest::Client::new(),
        }
    }

    pub fn add(&self, name: String, url: String, backend: Option<String>) -> Worker {
        let worker = Worker::new(name, url, backend);
        self.insert(worker.clone());
        worker
    }

    /// Register an already-constructed `Worker`, preserving its id.
    ///
    /// Used to rehydrate workers loaded from the persistent store on
    /// startup, so a restart never orphans the stored id: `enable`/`disable`
    /// by persisted id and health-check stat writebacks keyed on it continue
    /// to resolve against the live pool.
    pub fn insert(&self, worker: Worker) {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        if !guard.workers.contains_key(&worker.id) {
            guard.order.push(worker.id);
        }
        guard.workers.insert(worker.id, worker);
    }

    /// Fails if the worker currently carries a job.
    pub fn remove(&self, id: WorkerId) -> Result<Worker> {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        let worker = guard
            .workers
            .get(&id)
            .cloned()
            .ok_or(Error::WorkerNotFound(id))?;
        if worker.current_job_id.is_some() {
            return Err(Error::Other(format!(
                "worker {id} is running a job and cannot be removed"
            )));
        }
        guard.workers.remove(&id);
        guard.order.retain(|w| *w != id);
        Ok(worker)
    }

    /// Fails if changing `url` while the worker is `busy`.
    pub fn update(&self, id: WorkerId, name: Option<String>, url: Option<String>, backend: Option<Option<String>>) -> Result<Worker> {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        let worker = guard.workers.get_mut(&id).ok_or(Error::WorkerNotFound(id))?;
        if let Some(new_url) = &url {
            let normalized = normalize_url(new_url);
            if normalized != worker.url && worker.status == WorkerStatus::Busy {
                return Err(Error::Other(format!(
                    "cannot change url of worker {id} while busy"
                )));
            }
            worker.url = normalized;
        }
        if let Some(n) = name {
            worker.name = n;
        }
        if let Some(b) = backend {
            worker.backend = b;
        }
        Ok(worker.clone())
    }

    pub fn enable(&self, id: WorkerId) -> Result<Worker> {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        let worker = guard.workers.get_mut(&id).ok_or(Error::WorkerNotFound(id))?;
        worker.enabled = true;
        worker.status = WorkerStatus::Idle;
        Ok(worker.clone())
    }

    pub fn disable(&self, id: WorkerId) -> Result<Worker> {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        let worker = guard.workers.get_mut(&id).ok_or(Error::WorkerNotFound(id))?;
        worker.enabled = false;
        worker.status = WorkerStatus::Disabled;
        Ok(worker.clone())
    }

    pub fn get(&self, id: WorkerId) -> Option<Worker> {
        let guard = self.inner.lock().expect("pool mutex poisoned");
        guard.workers.get(&id).cloned()
    }

    pub fn get_all(&self) -> Vec<Worker> {
        let guard = self.inner.lock().expect("pool mutex poisoned");
        guard
            .order
            .iter()
            .filter_map(|id| guard.workers.get(id).cloned())
            .collect()
    }

    pub fn set_status(&self, id: WorkerId, status: WorkerStatus) -> Result<()> {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        let worker = guard.workers.get_mut(&id).ok_or(Error::WorkerNotFound(id))?;
        worker.status = status;
        Ok(())
    }

    pub fn set_current_job(&self, id: WorkerId, job_id: Option<Uuid>) -> Result<()> {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        let worker = guard.workers.get_mut(&id).ok_or(Error::WorkerNotFound(id))?;
        worker.current_job_id = job_id;
        Ok(())
    }

    pub fn increment_total(&self, id: WorkerId) {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        if let Some(worker) = guard.workers.get_mut(&id) {
            worker.total_jobs += 1;
        }
    }

    pub fn increment_failed(&self, id: WorkerId) {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        if let Some(worker) = guard.workers.get_mut(&id) {
            worker.failed_jobs += 1;
        }
    }

    pub fn update_heartbeat(&self, id: WorkerId) {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        if let Some(worker) = guard.workers.get_mut(&id) {
            worker.last_heartbeat = Some(Utc::now());
        }
    }

    /// Atomically bind `job_id` to the first idle, enabled worker, in
    /// insertion order, marking it `busy`. Returns `None` if no worker is
    /// eligible. This is the single commit point the dispatcher relies on
    /// for pairing atomicity.
    pub fn try_bind_idle(&self, job_id: Uuid) -> Option<Worker> {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        let id = guard
            .order
            .iter()
            .find(|id| {
                guard
                    .workers
                    .get(id)
                    .map(|w| w.is_idle_and_enabled())
                    .unwrap_or(false)
            })
            .copied()?;
        let worker = guard.workers.get_mut(&id)?;
        worker.status = WorkerStatus::Busy;
        worker.current_job_id = Some(job_id);
        Some(worker.clone())
    }

    /// Release a worker back to `idle` if it is still `enabled`, clearing
    /// `current_job_id`. Runs regardless of the executor's outcome.
    pub fn release(&self, id: WorkerId) {
        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        if let Some(worker) = guard.workers.get_mut(&id) {
            worker.current_job_id = None;
            if worker.enabled {
                worker.status = WorkerStatus::Idle;
            }
        }
    }

    /// Probe every enabled worker's `/health` endpoint concurrently.
    ///
    /// A busy worker's status is never overwritten by a probe result: this
    /// guards against demoting a worker that was dispatched to in the same
    /// window the probe was already in flight.
    pub async fn health_check(&self, timeout: Duration) {
        let targets: Vec<(WorkerId, String)> = {
            let guard = self.inner.lock().expect("pool mutex poisoned");
            guard
                .order
                .iter()
                .filter_map(|id| guard.workers.get(id))
                .filter(|w| w.enabled)
                .map(|w| (w.id, w.url.clone()))
                .collect()
        };

        let probes = targets.into_iter().map(|(id, url)| {
            let client = self.http.clone();
            async move {
                let result = client
                    .get(format!("{url}/health"))
                    .timeout(timeout)
                    .send()
                    .await;
                (id, result)
            }
        });

        let results = futures::future::join_all(probes).await;

        let mut guard = self.inner.lock().expect("pool mutex poisoned");
        for (id, result) in results {
            let Some(worker) = guard.workers.get_mut(&id) else {
                continue;
            };
            if worker.current_job_id.is_some() {
                // busy: do not overwrite status, but a success still stamps
                // the heartbeat.
                if matches!(&result, Ok(resp) if resp.status().is_success()) {
                    worker.last_heartbeat = Some(Utc::now());
                }
                continue;
            }
            match result {
                Ok(resp) if resp.status().is_success() => {
                    worker.last_heartbeat = Some(Utc::now());
                    if worker.status == WorkerStatus::Offline {
                        worker.status = WorkerStatus::Idle;
                    }
                }
                Ok(_) => worker.status = WorkerStatus::Error,
                Err(_) => worker.status = WorkerStatus::Offline,
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_registers_offline_enabled_worker() {
        let pool = WorkerPool::new();
        let w = pool.add("w1".into(), "http://host/".into(), None);
        assert_eq!(pool.get(w.id).unwrap().status, WorkerStatus::Offline);
    }

    #[test]
    fn insert_preserves_the_given_id() {
        let pool = WorkerPool::new();
        let worker = Worker::new("w1".into(), "http://host".into(), None);
        let id = worker.id;
        pool.insert(worker);
        assert_eq!(pool.get(id).unwrap().id, id);
        assert_eq!(pool.get_all().len(), 1);
    }

    #[test]
    fn select_idle_scans_insertion_order() {
        let pool = WorkerPool::new();
        let w1 = pool.add("w1".into(), "http://a".into(), None);
        let w2 = pool.add("w2".into(), "http://b".into(), None);
        pool.set_status(w1.id, WorkerStatus::Idle).unwrap();
        pool.set_status(w2.id, WorkerStatus::Idle).unwrap();

        let bound = pool.try_bind_idle(Uuid::new_v4()).unwrap();
        assert_eq!(bound.id, w1.id);
        assert_eq!(pool.get(w1.id).unwrap().status, WorkerStatus::Busy);
    }

    #[test]
    fn disabled_worker_never_selected() {
        let pool = WorkerPool::new();
        let w1 = pool.add("w1".into(), "http://a".into(), None);
        pool.set_status(w1.id, WorkerStatus::Idle).unwrap();
        pool.disable(w1.id).unwrap();
        assert!(pool.try_bind_idle(Uuid::new_v4()).is_none());
    }

    #[test]
    fn remove_fails_while_running() {
        let pool = WorkerPool::new();
        let w1 = pool.add("w1".into(), "http://a".into(), None);
        pool.set_status(w1.id, WorkerStatus::Idle).unwrap();
        let job_id = Uuid::new_v4();
        pool.try_bind_idle(job_id).unwrap();
        assert!(pool.remove(w1.id).is_err());
        pool.release(w1.id);
        assert!(pool.remove(w1.id).is_ok());
    }

    #[test]
    fn release_restores_idle_only_if_enabled() {
        let pool = WorkerPool::new();
        let w1 = pool.add("w1".into(), "http://a".into(), None);
        pool.set_status(w1.id, WorkerStatus::Idle).unwrap();
        pool.try_bind_idle(Uuid::new_v4()).unwrap();
        pool.disable(w1.id).unwrap();
        pool.release(w1.id);
        assert_eq!(pool.get(w1.id).unwrap().status, WorkerStatus::Disabled);
    }
}
