//! Set of jobs currently bound to a worker and in flight.
//!
//! Shares its concurrency discipline with the wait registry: the mutex is
//! held only for the map mutation, never across the executor's await.

use crate::job::{Job, JobId};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct RunningSet {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl RunningSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        let mut guard = self.jobs.lock().expect("running set mutex poisoned");
        guard.insert(job.id, job);
    }

    pub fn remove(&self, id: JobId) -> Option<Job> {
        let mut guard = self.jobs.lock().expect("running set mutex poisoned");
        guard.remove(&id)
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        let guard = self.jobs.lock().expect("running set mutex poisoned");
        guard.get(&id).cloned()
    }

    pub fn contains(&self, id: JobId) -> bool {
        let guard = self.jobs.lock().expect("running set mutex poisoned");
        guard.contains_key(&id)
    }

    /// Mark the job `cancelled` and remove it from the running set, so a
    /// concurrently-completing executor's `remove` finds nothing and
    /// discards its outcome instead of resurrecting the job.
    pub fn mark_cancelled(&self, id: JobId) -> Option<Job> {
        let mut guard = self.jobs.lock().expect("running set mutex poisoned");
        if let Some(job) = guard.get_mut(&id) {
            job.mark_cancelled();
            let snapshot = job.clone();
            guard.remove(&id);
            return Some(snapshot);
        }
        None
    }

    pub fn all(&self) -> Vec<Job> {
        let guard = self.jobs.lock().expect("running set mutex poisoned");
        guard.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let guard = self.jobs.lock().expect("running set mutex poisoned");
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_remove_round_trips() {
        let set = RunningSet::new();
        let job = Job::new(serde_json::json!({}), 5, None);
        let id = job.id;
        set.insert(job);
        assert!(set.contains(id));
        let removed = set.remove(id).unwrap();
        assert_eq!(removed.id, id);
        assert!(!set.contains(id));
    }

    #[test]
    fn mark_cancelled_removes_and_returns_terminal_copy() {
        let set = RunningSet::new();
        let job = Job::new(serde_json::json!({}), 5, None);
        let id = job.id;
        set.insert(job);
        let cancelled = set.mark_cancelled(id).unwrap();
        assert_eq!(cancelled.status, crate::job::JobStatus::Cancelled);
        assert!(!set.contains(id));
    }
}
