//! Remote worker endpoint descriptor and live status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type WorkerId = Uuid;

/// Live worker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
    Error,
    Disabled,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Error => "error",
            WorkerStatus::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

/// Remote document-parsing endpoint registered with the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub url: String,
    pub status: WorkerStatus,
    pub current_job_id: Option<Uuid>,
    pub total_jobs: u64,
    pub failed_jobs: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub backend: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Worker {
    /// New worker in `offline` status, awaiting its first successful probe.
    ///
    /// `url` is normalized by stripping any trailing slashes, matching the
    /// original registration path's `url.rstrip("/")`.
    pub fn new(name: String, url: String, backend: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            url: normalize_url(&url),
            status: WorkerStatus::Offline,
            current_job_id: None,
            total_jobs: 0,
            failed_jobs: 0,
            last_heartbeat: None,
            enabled: true,
            backend,
            created_at: Utc::now(),
        }
    }

    pub fn is_idle_and_enabled(&self) -> bool {
        self.enabled && self.status == WorkerStatus::Idle
    }
}

/// Strip trailing slashes the way the original registration path does.
pub fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_worker_is_offline_and_enabled() {
        let w = Worker::new("w1".into(), "http://host:1234/".into(), None);
        assert_eq!(w.status, WorkerStatus::Offline);
        assert!(w.enabled);
        assert!(w.current_job_id.is_none());
    }

    #[test]
    fn registration_strips_trailing_slashes() {
        assert_eq!(normalize_url("http://host:1234///"), "http://host:1234");
        assert_eq!(normalize_url("http://host:1234"), "http://host:1234");
    }

    #[test]
    fn idle_and_enabled_check() {
        let mut w = Worker::new("w1".into(), "http://host".into(), None);
        w.status = WorkerStatus::Idle;
        assert!(w.is_idle_and_enabled());
        w.enabled = false;
        assert!(!w.is_idle_and_enabled());
    }
}
