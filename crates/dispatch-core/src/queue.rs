//! In-memory priority queue of pending jobs.
//!
//! Backed by a binary heap plus a live-id set so `Remove` can tombstone in
//! O(1) and leave heap cleanup to the next pop, instead of rebuilding a
//! sorted structure on every cancellation.

use crate::error::{Error, Result};
use crate::job::{HeapKey, Job, JobId};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug)]
struct Entry {
    key: HeapKey,
    id: JobId,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    jobs: HashMap<JobId, Job>,
    live: HashSet<JobId>,
    sequence: u64,
}

/// Ordered multiset of pending jobs keyed by (priority desc, created_at asc).
///
/// All operations take the single internal mutex; critical sections never
/// perform I/O, so enqueue/dequeue/admission never race each other.
pub struct PriorityQueue {
    inner: Mutex<Inner>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                jobs: HashMap::new(),
                live: HashSet::new(),
                sequence: 0,
            }),
        }
    }

    /// Insert `job`. Returns the 1-based position under canonical ordering.
    pub fn enqueue(&self, job: Job) -> Result<usize> {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        if guard.jobs.contains_key(&job.id) {
            return Err(Error::DuplicateId(job.id));
        }
        let seq = guard.sequence;
        guard.sequence += 1;
        let key = HeapKey {
            priority: job.priority,
            created_at: job.created_at,
            sequence: seq,
        };
        let id = job.id;
        guard.live.insert(id);
        guard.jobs.insert(id, job);
        guard.heap.push(Entry { key, id });
        Ok(Self::position_locked(&guard, id).unwrap_or(guard.live.len()))
    }

    /// Re-insert a job at the head (used to restore a job whose pop could
    /// not be finalized into a binding).
    pub fn enqueue_at_head(&self, job: Job) {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        // Sequence 0 always wins ties against normally-enqueued jobs of the
        // same priority/age, restoring this job ahead of them.
        let key = HeapKey {
            priority: job.priority,
            created_at: job.created_at,
            sequence: 0,
        };
        let id = job.id;
        guard.live.insert(id);
        guard.jobs.insert(id, job);
        guard.heap.push(Entry { key, id });
    }

    /// Remove and return the highest-priority live job, or `None` if empty.
    pub fn dequeue(&self) -> Option<Job> {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        loop {
            let entry = guard.heap.pop()?;
            if !guard.live.remove(&entry.id) {
                // tombstoned, keep popping
                continue;
            }
            return guard.jobs.remove(&entry.id);
        }
    }

    /// Return the highest-priority live job without removing it.
    pub fn peek(&self) -> Option<Job> {
        let guard = self.inner.lock().expect("queue mutex poisoned");
        let mut candidates: Vec<&Entry> = guard.heap.iter().collect();
        candidates.sort_by(|a, b| b.key.cmp(&a.key));
        for entry in candidates {
            if guard.live.contains(&entry.id) {
                return guard.jobs.get(&entry.id).cloned();
            }
        }
        None
    }

    /// Tombstone `id` so it is skipped on the next pop. Returns the job if present.
    pub fn remove(&self, id: JobId) -> Option<Job> {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        if guard.live.remove(&id) {
            guard.jobs.remove(&id)
        } else {
            None
        }
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        let guard = self.inner.lock().expect("queue mutex poisoned");
        if guard.live.contains(&id) {
            guard.jobs.get(&id).cloned()
        } else {
            None
        }
    }

    pub fn size(&self) -> usize {
        let guard = self.inner.lock().expect("queue mutex poisoned");
        guard.live.len()
    }

    /// Ordered snapshot of all live jobs, highest priority first.
    pub fn list(&self) -> Vec<Job> {
        let guard = self.inner.lock().expect("queue mutex poisoned");
        let mut entries: Vec<&Entry> = guard
            .heap
            .iter()
            .filter(|e| guard.live.contains(&e.id))
            .collect();
        entries.sort_by(|a, b| b.key.cmp(&a.key));
        entries
            .into_iter()
            .filter_map(|e| guard.jobs.get(&e.id).cloned())
            .collect()
    }

    /// 1-based position of `id` under canonical ordering, or `None` if absent.
    pub fn position(&self, id: JobId) -> Option<usize> {
        let guard = self.inner.lock().expect("queue mutex poisoned");
        Self::position_locked(&guard, id)
    }

    fn position_locked(guard: &Inner, id: JobId) -> Option<usize> {
        if !guard.live.contains(&id) {
            return None;
        }
        let mut entries: Vec<&Entry> = guard
            .heap
            .iter()
            .filter(|e| guard.live.contains(&e.id))
            .collect();
        entries.sort_by(|a, b| b.key.cmp(&a.key));
        entries.iter().position(|e| e.id == id).map(|p| p + 1)
    }

    /// Remove jobs whose age exceeds `queue_timeout`, returning them for the
    /// dispatcher to mark `timeout` and signal.
    pub fn sweep_expired(&self, queue_timeout: chrono::Duration) -> Vec<Job> {
        let mut guard = self.inner.lock().expect("queue mutex poisoned");
        let now = chrono::Utc::now();
        let expired_ids: Vec<JobId> = guard
            .live
            .iter()
            .filter(|id| {
                guard
                    .jobs
                    .get(id)
                    .map(|j| now - j.created_at > queue_timeout)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            guard.live.remove(&id);
            if let Some(job) = guard.jobs.remove(&id) {
                expired.push(job);
            }
        }
        expired
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}
