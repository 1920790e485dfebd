//! Pre-registered completion signals for synchronous job submission.
//!
//! A submitter registers its signal *before* the job becomes visible to the
//! dispatcher, so a job that completes between enqueue and await can never
//! be missed. The registry mutex is held only long enough to register or
//! fire a signal, never across the submitter's await itself.

use crate::job::{Job, JobId};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Default)]
pub struct WaitRegistry {
    waiters: Mutex<HashMap<JobId, oneshot::Sender<Job>>>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register a one-shot signal for `id`, returning the receiving half.
    /// Must be called before the job becomes visible to the dispatcher.
    pub fn register(&self, id: JobId) -> oneshot::Receiver<Job> {
        let (tx, rx) = oneshot::channel();
        let mut guard = self.waiters.lock().expect("wait registry mutex poisoned");
        guard.insert(id, tx);
        rx
    }

    pub fn deregister(&self, id: JobId) {
        let mut guard = self.waiters.lock().expect("wait registry mutex poisoned");
        guard.remove(&id);
    }

    /// Fire the signal for `job.id` exactly once, if a waiter is registered.
    /// No-op (not an error) when nobody is waiting.
    pub fn signal(&self, job: Job) {
        let sender = {
            let mut guard = self.waiters.lock().expect("wait registry mutex poisoned");
            guard.remove(&job.id)
        };
        if let Some(sender) = sender {
            // Send failure means the receiver was dropped; the terminal
            // state is still recorded by the caller regardless.
            let _ = sender.send(job);
        }
    }

    pub fn has_waiter(&self, id: JobId) -> bool {
        let guard = self.waiters.lock().expect("wait registry mutex poisoned");
        guard.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    #[tokio::test]
    async fn signal_delivers_to_registered_waiter() {
        let registry = WaitRegistry::new();
        let job = Job::new(serde_json::json!({}), 5, None);
        let rx = registry.register(job.id);

        let mut terminal = job.clone();
        terminal.status = JobStatus::Completed;
        registry.signal(terminal.clone());

        let received = rx.await.unwrap();
        assert_eq!(received.status, JobStatus::Completed);
    }

    #[test]
    fn signal_without_waiter_is_a_noop() {
        let registry = WaitRegistry::new();
        let job = Job::new(serde_json::json!({}), 5, None);
        registry.signal(job);
    }

    #[test]
    fn deregister_removes_pending_waiter() {
        let registry = WaitRegistry::new();
        let job = Job::new(serde_json::json!({}), 5, None);
        let _rx = registry.register(job.id);
        assert!(registry.has_waiter(job.id));
        registry.deregister(job.id);
        assert!(!registry.has_waiter(job.id));
    }
}
