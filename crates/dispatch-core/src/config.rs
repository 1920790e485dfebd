//! Process and scheduler configuration.
//!
//! Split mirrors the teacher's `Config`/domain-config separation: `ProcessConfig`
//! covers bind address and logging (restart required to change), `SchedulerConfig`
//! covers the hot-reloadable dispatch tunables.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Process-wide settings that require a restart to change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            database_url: None,
        }
    }
}

impl ProcessConfig {
    /// Load from an explicit TOML file path.
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Other(format!("cannot read config file {path}: {e}")))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::Other(format!("invalid config file {path}: {e}")))?;
        Ok(config)
    }

    /// `DISPATCH_CONFIG` env var pointing at a TOML file, else defaults.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("DISPATCH_CONFIG") {
            if Path::new(&path).exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }
}

fn default_task_timeout() -> u64 {
    300
}
fn default_queue_timeout() -> u64 {
    600
}
fn default_max_queue_size() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    5
}
fn default_health_check_interval() -> u64 {
    30
}
fn default_instance_timeout() -> u64 {
    10
}

/// Hot-reloadable tunables for the dispatcher, executor and health-check loop.
///
/// See spec §4.8 for the validation bounds each field is checked against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Execution deadline per dispatched job, seconds.
    #[serde(default = "default_task_timeout")]
    pub task_timeout: u64,
    /// Max time a job may sit pending in the queue before it expires, seconds.
    #[serde(default = "default_queue_timeout")]
    pub queue_timeout: u64,
    /// Admission limit on the priority queue.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Whether submitted priority is honored (`false` forces the default band).
    #[serde(default = "default_true")]
    pub enable_priority: bool,
    /// Maximum retry attempts after the first try.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before a failed job is re-enqueued, seconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Cadence of the worker-pool health probe, seconds.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    /// Per-probe HTTP timeout, seconds.
    #[serde(default = "default_instance_timeout")]
    pub instance_timeout: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            task_timeout: default_task_timeout(),
            queue_timeout: default_queue_timeout(),
            max_queue_size: default_max_queue_size(),
            enable_priority: true,
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            health_check_interval: default_health_check_interval(),
            instance_timeout: default_instance_timeout(),
        }
    }
}

impl SchedulerConfig {
    /// Bounds-check every field per spec §4.8, returning the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.task_timeout < 10 {
            return Err(invalid("task_timeout", "must be >= 10"));
        }
        if self.queue_timeout < 60 {
            return Err(invalid("queue_timeout", "must be >= 60"));
        }
        if self.max_queue_size < 1 {
            return Err(invalid("max_queue_size", "must be >= 1"));
        }
        if self.retry_delay < 1 {
            return Err(invalid("retry_delay", "must be >= 1"));
        }
        if self.health_check_interval < 5 {
            return Err(invalid("health_check_interval", "must be >= 5"));
        }
        if self.instance_timeout < 1 {
            return Err(invalid("instance_timeout", "must be >= 1"));
        }
        // max_retries >= 0 is trivially true for u32.
        Ok(())
    }

    /// Apply a partial update (PATCH semantics), validating the result before
    /// returning it. The caller is responsible for swapping it into the shared
    /// reference only once validation succeeds.
    pub fn merge(&self, update: &SchedulerConfigUpdate) -> Result<Self> {
        let mut next = self.clone();
        if let Some(v) = update.task_timeout {
            next.task_timeout = v;
        }
        if let Some(v) = update.queue_timeout {
            next.queue_timeout = v;
        }
        if let Some(v) = update.max_queue_size {
            next.max_queue_size = v;
        }
        if let Some(v) = update.enable_priority {
            next.enable_priority = v;
        }
        if let Some(v) = update.max_retries {
            next.max_retries = v;
        }
        if let Some(v) = update.retry_delay {
            next.retry_delay = v;
        }
        if let Some(v) = update.health_check_interval {
            next.health_check_interval = v;
        }
        if let Some(v) = update.instance_timeout {
            next.instance_timeout = v;
        }
        next.validate()?;
        Ok(next)
    }
}

fn invalid(field: &str, message: &str) -> Error {
    Error::InvalidConfig {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Partial update body for `PATCH /api/config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfigUpdate {
    pub task_timeout: Option<u64>,
    pub queue_timeout: Option<u64>,
    pub max_queue_size: Option<usize>,
    pub enable_priority: Option<bool>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<u64>,
    pub health_check_interval: Option<u64>,
    pub instance_timeout: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn task_timeout_below_ten_rejected() {
        let mut cfg = SchedulerConfig::default();
        cfg.task_timeout = 5;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn merge_validates_before_applying() {
        let cfg = SchedulerConfig::default();
        let update = SchedulerConfigUpdate {
            queue_timeout: Some(10),
            ..Default::default()
        };
        assert!(cfg.merge(&update).is_err());
        // original untouched
        assert_eq!(cfg.queue_timeout, default_queue_timeout());
    }

    #[test]
    fn merge_applies_only_provided_fields() {
        let cfg = SchedulerConfig::default();
        let update = SchedulerConfigUpdate {
            max_retries: Some(7),
            ..Default::default()
        };
        let merged = cfg.merge(&update).unwrap();
        assert_eq!(merged.max_retries, 7);
        assert_eq!(merged.task_timeout, cfg.task_timeout);
    }
}
