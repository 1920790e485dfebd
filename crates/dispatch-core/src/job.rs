//! Job identity and lifecycle record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

pub type JobId = Uuid;

/// Submitted priority, 1 (lowest) to 10 (highest); larger dispatches earlier.
pub type Priority = u8;

pub const MIN_PRIORITY: Priority = 1;
pub const MAX_PRIORITY: Priority = 10;
pub const DEFAULT_PRIORITY: Priority = 5;

/// Clamp an out-of-range submitted priority into the valid band.
pub fn clamp_priority(p: Priority) -> Priority {
    p.clamp(MIN_PRIORITY, MAX_PRIORITY)
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A dispatched document-parsing job, from submission through terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: JobStatus,
    pub file_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub worker_id: Option<Uuid>,
    pub worker_name: Option<String>,
}

impl Job {
    pub fn new(payload: serde_json::Value, priority: Priority, file_name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            priority: clamp_priority(priority),
            status: JobStatus::Pending,
            file_name,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            worker_id: None,
            worker_name: None,
        }
    }

    pub fn mark_running(&mut self, worker_id: Uuid, worker_name: String) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_id = Some(worker_id);
        self.worker_name = Some(worker_name);
    }

    pub fn mark_completed(&mut self, result: serde_json::Value) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    /// Reset to pending for re-enqueue, preserving `created_at` and `id`.
    pub fn mark_retrying(&mut self) {
        self.status = JobStatus::Pending;
        self.started_at = None;
        self.worker_id = None;
        self.worker_name = None;
        self.retry_count += 1;
    }

    pub fn mark_terminal_failure(&mut self, status: JobStatus, error: String) {
        debug_assert!(matches!(status, JobStatus::Failed | JobStatus::Timeout));
        self.status = status;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.error = Some("Cancelled".to_string());
        self.completed_at = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(s), Some(c)) => Some(c - s),
            _ => None,
        }
    }
}

/// Heap ordering key: higher priority first, then earlier `created_at` first.
///
/// `BinaryHeap` is a max-heap, so "greater" here must mean "pops sooner".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapKey {
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_clamped_into_band() {
        assert_eq!(clamp_priority(0), MIN_PRIORITY);
        assert_eq!(clamp_priority(20), MAX_PRIORITY);
        assert_eq!(clamp_priority(7), 7);
    }

    #[test]
    fn heap_key_orders_by_priority_then_age() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let high = HeapKey { priority: 8, created_at: t1, sequence: 2 };
        let low_old = HeapKey { priority: 5, created_at: t0, sequence: 0 };
        let low_new = HeapKey { priority: 5, created_at: t1, sequence: 1 };
        assert!(high > low_old);
        assert!(low_old > low_new);
    }

    #[test]
    fn new_job_starts_pending() {
        let job = Job::new(serde_json::json!({}), 5, None);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.worker_id.is_none());
    }

    #[test]
    fn retry_preserves_id_and_created_at() {
        let mut job = Job::new(serde_json::json!({}), 5, None);
        let id = job.id;
        let created = job.created_at;
        job.mark_running(Uuid::new_v4(), "w1".into());
        job.mark_retrying();
        assert_eq!(job.id, id);
        assert_eq!(job.created_at, created);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.worker_id.is_none());
    }
}
