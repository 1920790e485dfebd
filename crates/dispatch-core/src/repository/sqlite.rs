//! SQLite-backed persistence for config, workers, and job history.

use super::traits::{ConfigRepositoryTrait, JobRepositoryTrait, WorkerRepositoryTrait};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::job::{Job, JobStatus};
use crate::worker::{Worker, WorkerStatus};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let repo = Self { pool };
        repo.init_schema().await?;
        Ok(repo)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                total_jobs INTEGER NOT NULL DEFAULT 0,
                failed_jobs INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                backend TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 5,
                payload TEXT,
                file_name TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                worker_id TEXT,
                worker_name TEXT,
                error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                duration REAL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ConfigRepositoryTrait for SqliteRepository {
    async fn load(&self) -> Result<SchedulerConfig> {
        let rows = sqlx::query("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(SchedulerConfig::default());
        }
        let mut map = serde_json::Map::new();
        for row in rows {
            let key: String = row.try_get("key").map_err(|e| Error::Persistence(e.to_string()))?;
            let value: String = row.try_get("value").map_err(|e| Error::Persistence(e.to_string()))?;
            let parsed: serde_json::Value =
                serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            map.insert(key, parsed);
        }
        let value = serde_json::Value::Object(map);
        serde_json::from_value(value).map_err(Into::into)
    }

    async fn save(&self, config: &SchedulerConfig) -> Result<()> {
        let value = serde_json::to_value(config)?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Other("config did not serialize to an object".to_string()))?;
        let mut tx = self.pool.begin().await?;
        for (key, value) in obj {
            let encoded = serde_json::to_string(value)?;
            sqlx::query("INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(encoded)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl WorkerRepositoryTrait for SqliteRepository {
    async fn list(&self) -> Result<Vec<Worker>> {
        let rows = sqlx::query("SELECT * FROM workers").fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_worker).collect()
    }

    async fn upsert(&self, worker: &Worker) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO workers
             (id, name, url, enabled, total_jobs, failed_jobs, created_at, backend)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(worker.id.to_string())
        .bind(&worker.name)
        .bind(&worker.url)
        .bind(worker.enabled as i64)
        .bind(worker.total_jobs as i64)
        .bind(worker.failed_jobs as i64)
        .bind(worker.created_at.to_rfc3339())
        .bind(&worker.backend)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM workers WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE workers SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_stats(&self, id: Uuid, total_jobs: u64, failed_jobs: u64) -> Result<()> {
        sqlx::query("UPDATE workers SET total_jobs = ?, failed_jobs = ? WHERE id = ?")
            .bind(total_jobs as i64)
            .bind(failed_jobs as i64)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobRepositoryTrait for SqliteRepository {
    async fn upsert(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;
        let duration = job.duration().map(|d| d.num_milliseconds() as f64 / 1000.0);
        sqlx::query(
            "INSERT OR REPLACE INTO jobs
             (id, status, priority, payload, file_name, created_at, started_at, completed_at,
              worker_id, worker_name, error, retry_count, duration)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.status.to_string())
        .bind(job.priority as i64)
        .bind(payload)
        .bind(&job.file_name)
        .bind(job.created_at.to_rfc3339())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .bind(job.worker_id.map(|id| id.to_string()))
        .bind(&job.worker_name)
        .bind(&job.error)
        .bind(job.retry_count as i64)
        .bind(duration)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job).transpose()
    }

    async fn list_by_status(&self, status: JobStatus, page: u32, page_size: u32) -> Result<Vec<Job>> {
        let offset = (page.saturating_sub(1) as i64) * page_size as i64;
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(status.to_string())
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    async fn list_failed(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = 'failed' ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_job).collect()
    }
}

fn row_to_worker(row: sqlx::sqlite::SqliteRow) -> Result<Worker> {
    let id: String = row.try_get("id").map_err(|e| Error::Persistence(e.to_string()))?;
    let created_at: String = row.try_get("created_at").map_err(|e| Error::Persistence(e.to_string()))?;
    Ok(Worker {
        id: Uuid::parse_str(&id).map_err(|e| Error::Persistence(e.to_string()))?,
        name: row.try_get("name").map_err(|e| Error::Persistence(e.to_string()))?,
        url: row.try_get("url").map_err(|e| Error::Persistence(e.to_string()))?,
        status: WorkerStatus::Offline,
        current_job_id: None,
        total_jobs: row.try_get::<i64, _>("total_jobs").map_err(|e| Error::Persistence(e.to_string()))? as u64,
        failed_jobs: row.try_get::<i64, _>("failed_jobs").map_err(|e| Error::Persistence(e.to_string()))? as u64,
        last_heartbeat: None,
        enabled: row.try_get::<i64, _>("enabled").map_err(|e| Error::Persistence(e.to_string()))? != 0,
        backend: row.try_get("backend").ok(),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Persistence(e.to_string()))?
            .with_timezone(&chrono::Utc),
    })
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<Job> {
    let id: String = row.try_get("id").map_err(|e| Error::Persistence(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| Error::Persistence(e.to_string()))?;
    let payload: Option<String> = row.try_get("payload").ok();
    let created_at: String = row.try_get("created_at").map_err(|e| Error::Persistence(e.to_string()))?;
    let started_at: Option<String> = row.try_get("started_at").ok();
    let completed_at: Option<String> = row.try_get("completed_at").ok();
    let worker_id: Option<String> = row.try_get("worker_id").ok();

    Ok(Job {
        id: Uuid::parse_str(&id).map_err(|e| Error::Persistence(e.to_string()))?,
        payload: payload
            .and_then(|p| serde_json::from_str(&p).ok())
            .unwrap_or(serde_json::Value::Null),
        priority: row.try_get::<i64, _>("priority").map_err(|e| Error::Persistence(e.to_string()))? as u8,
        status: parse_status(&status)?,
        file_name: row.try_get("file_name").ok(),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Persistence(e.to_string()))?
            .with_timezone(&chrono::Utc),
        started_at: started_at.and_then(|t| chrono::DateTime::parse_from_rfc3339(&t).ok()).map(|t| t.with_timezone(&chrono::Utc)),
        completed_at: completed_at.and_then(|t| chrono::DateTime::parse_from_rfc3339(&t).ok()).map(|t| t.with_timezone(&chrono::Utc)),
        result: None,
        error: row.try_get("error").ok(),
        retry_count: row.try_get::<i64, _>("retry_count").map_err(|e| Error::Persistence(e.to_string()))? as u32,
        worker_id: worker_id.and_then(|id| Uuid::parse_str(&id).ok()),
        worker_name: row.try_get("worker_name").ok(),
    })
}

fn parse_status(s: &str) -> Result<JobStatus> {
    Ok(match s {
        "pending" => JobStatus::Pending,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "timeout" => JobStatus::Timeout,
        "cancelled" => JobStatus::Cancelled,
        other => return Err(Error::Persistence(format!("unknown job status '{other}'"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_initializes_and_round_trips_a_worker() {
        let repo = SqliteRepository::connect("sqlite::memory:").await.unwrap();
        let worker = Worker::new("w1".into(), "http://host".into(), Some("pipeline".into()));
        repo.upsert(&worker).await.unwrap();
        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "w1");
    }

    #[tokio::test]
    async fn config_round_trips_through_json_rows() {
        let repo = SqliteRepository::connect("sqlite::memory:").await.unwrap();
        let mut cfg = SchedulerConfig::default();
        cfg.max_retries = 9;
        repo.save(&cfg).await.unwrap();
        let loaded = repo.load().await.unwrap();
        assert_eq!(loaded.max_retries, 9);
    }

    #[tokio::test]
    async fn job_round_trips_and_filters_by_status() {
        let repo = SqliteRepository::connect("sqlite::memory:").await.unwrap();
        let job = Job::new(serde_json::json!({"a": 1}), 7, Some("doc.pdf".into()));
        repo.upsert(&job).await.unwrap();
        let found = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(found.priority, 7);
        let pending = repo.list_by_status(JobStatus::Pending, 1, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    /// A file-backed database (as opposed to `sqlite::memory:`) persists
    /// across reconnects, exercising `init_schema`'s `IF NOT EXISTS` guards
    /// on a database that already has tables.
    #[tokio::test]
    async fn file_backed_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("dispatch-test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let worker_id = {
            let repo = SqliteRepository::connect(&url).await.unwrap();
            let worker = Worker::new("w1".into(), "http://host".into(), None);
            repo.upsert(&worker).await.unwrap();
            worker.id
        };

        let repo = SqliteRepository::connect(&url).await.unwrap();
        let reloaded = repo.list().await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].id, worker_id);
    }
}
