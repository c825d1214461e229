//! # Async State Store (sqlx + SQLite)
//!
//! Durable, crash-tolerant storage for [`CallJob`] records. A single table
//! (`call_jobs`) backs four logical views: the four priority queues, the
//! scheduled index, the active set, and point lookups by id. The views are
//! expressed as indexed queries over `status`/`priority`/`scheduled_at`/
//! `active_since` rather than as separate physical structures.
//!
//! All operations are async and `Send`-safe; there is no `spawn_blocking`
//! boundary to cross.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::job::{AttemptRecord, CallJob, CallResult, JobStatus, Priority};

/// Outcome of [`StateStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Exists,
}

/// A partial update applied atomically by [`StateStore::update`].
///
/// Fields left `None` are left untouched. Attempting to change `status` away
/// from a terminal status is rejected.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub retry_count: Option<u32>,
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
    pub append_attempt: Option<AttemptRecord>,
    pub result: Option<CallResult>,
}

/// Durable state store for call jobs.
#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Connect and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("opening state store at {database_url}");
        let pool = SqlitePool::connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database, for tests.
    pub async fn new_in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a job if `id` is unseen; a no-op otherwise. Idempotent.
    pub async fn put(&self, job: &CallJob) -> Result<PutOutcome> {
        if self.get(&job.id).await?.is_some() {
            return Ok(PutOutcome::Exists);
        }

        let row = JobRow::from_domain(job);
        let res = sqlx::query(
            r#"
            INSERT OR IGNORE INTO call_jobs
                (id, phone_number, campaign_id, call_config, priority, scheduled_at,
                 max_retries, retry_count, status, created_at, updated_at, attempt_log,
                 result, active_since, owning_worker)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.phone_number)
        .bind(&row.campaign_id)
        .bind(&row.call_config)
        .bind(&row.priority)
        .bind(&row.scheduled_at)
        .bind(row.max_retries)
        .bind(row.retry_count)
        .bind(&row.status)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(&row.attempt_log)
        .bind(&row.result)
        .bind(&row.active_since)
        .bind(&row.owning_worker)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            Ok(PutOutcome::Exists)
        } else {
            debug!(call_id = %job.id, "job created");
            Ok(PutOutcome::Created)
        }
    }

    /// Move a Pending job onto its priority queue (a no-op on this schema
    /// beyond validating the precondition; the priority column is already set
    /// by `put`/`update`, and queue membership is just `status = 'pending'`).
    pub async fn enqueue(&self, id: &str, priority: Priority) -> Result<()> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("job {id} not found")))?;
        if existing.status.is_terminal() {
            return Err(EngineError::contract(format!(
                "cannot enqueue terminal job {id}"
            )));
        }
        sqlx::query("UPDATE call_jobs SET status = ?, priority = ?, updated_at = ? WHERE id = ?")
            .bind(JobStatus::Pending.as_str())
            .bind(priority_str(priority))
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Hold a job in the scheduled index until `at`.
    pub async fn schedule(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE call_jobs SET status = ?, scheduled_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Scheduled.as_str())
        .bind(at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically move up to `n` ready jobs into the active set, in strict
    /// priority order (Urgent > High > Normal > Low), FIFO within a level.
    /// Callers must not pop when the active set is already at capacity.
    pub async fn pop_ready(&self, n: usize, worker: &str) -> Result<Vec<CallJob>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut tx: Transaction<'_, Sqlite> = self.pool.begin().await?;

        let priority_case = "CASE priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'normal' THEN 2 ELSE 3 END";
        let query = format!(
            "SELECT id FROM call_jobs WHERE status = 'pending' \
             ORDER BY {priority_case} ASC, created_at ASC LIMIT ?"
        );
        let ids: Vec<String> = sqlx::query(&query)
            .bind(n as i64)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|r| r.get::<String, _>("id"))
            .collect();

        let mut jobs = Vec::with_capacity(ids.len());
        for id in &ids {
            sqlx::query(
                "UPDATE call_jobs SET status = ?, active_since = ?, owning_worker = ?, updated_at = ? WHERE id = ?",
            )
            .bind(JobStatus::Dispatching.as_str())
            .bind(Utc::now())
            .bind(worker)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;

            let row = sqlx::query("SELECT * FROM call_jobs WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            jobs.push(JobRow::from_row(&row)?.into_domain()?);
        }

        tx.commit().await?;
        if !jobs.is_empty() {
            debug!(count = jobs.len(), worker, "popped ready jobs");
        }
        Ok(jobs)
    }

    /// Move every scheduled job whose fire time has arrived back to Pending.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT id FROM call_jobs WHERE status = 'scheduled' AND scheduled_at <= ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        let ids: Vec<String> = rows.iter().map(|r| r.get::<String, _>("id")).collect();

        if !ids.is_empty() {
            sqlx::query(
                "UPDATE call_jobs SET status = 'pending', scheduled_at = NULL, updated_at = ? \
                 WHERE status = 'scheduled' AND scheduled_at <= ?",
            )
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            debug!(count = ids.len(), "promoted scheduled jobs");
        }
        Ok(ids)
    }

    /// Merge `patch` into the job record. Rejects writes that would overwrite
    /// a terminal status.
    pub async fn update(&self, id: &str, patch: JobPatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM call_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("job {id} not found")))?;
        let mut job = JobRow::from_row(&row)?.into_domain()?;

        if job.status.is_terminal() {
            if let Some(new_status) = patch.status {
                if new_status != job.status {
                    return Err(EngineError::contract(format!(
                        "job {id} is already terminal ({:?}), refusing to overwrite with {:?}",
                        job.status, new_status
                    )));
                }
            }
        } else if let Some(new_status) = patch.status {
            job.status = new_status;
        }

        if let Some(rc) = patch.retry_count {
            job.retry_count = rc;
        }
        if let Some(sched) = patch.scheduled_at {
            job.scheduled_at = sched;
        }
        if let Some(attempt) = patch.append_attempt {
            job.attempt_log.push(attempt);
        }
        if let Some(result) = patch.result {
            job.result = Some(result);
        }
        job.updated_at = Utc::now();

        let row = JobRow::from_domain(&job);
        sqlx::query(
            r#"
            UPDATE call_jobs SET
                status = ?, retry_count = ?, scheduled_at = ?, updated_at = ?,
                attempt_log = ?, result = ?
            WHERE id = ?
            "#,
        )
        .bind(&row.status)
        .bind(row.retry_count)
        .bind(&row.scheduled_at)
        .bind(row.updated_at)
        .bind(&row.attempt_log)
        .bind(&row.result)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Remove a job from the active set. Call on terminal transition.
    pub async fn release(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE call_jobs SET active_since = NULL, owning_worker = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Current size of the active set.
    pub async fn active_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM call_jobs WHERE active_since IS NOT NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Fetch all active jobs and filter with `predicate`, for the sweeper.
    pub async fn scan_active(&self, predicate: impl Fn(&CallJob) -> bool) -> Result<Vec<CallJob>> {
        let rows = sqlx::query("SELECT * FROM call_jobs WHERE active_since IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::new();
        for row in &rows {
            let job = JobRow::from_row(row)?.into_domain()?;
            if predicate(&job) {
                out.push(job);
            }
        }
        Ok(out)
    }

    /// Point lookup by id.
    pub async fn get(&self, id: &str) -> Result<Option<CallJob>> {
        let row = sqlx::query("SELECT * FROM call_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(JobRow::from_row(&row)?.into_domain()?)),
            None => Ok(None),
        }
    }

    /// Count Pending jobs per priority level, for queue metrics.
    pub async fn pending_counts(&self) -> Result<HashMap<Priority, i64>> {
        let rows = sqlx::query(
            "SELECT priority, COUNT(*) AS n FROM call_jobs WHERE status = 'pending' GROUP BY priority",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut counts: HashMap<Priority, i64> = Priority::ALL.iter().map(|p| (*p, 0)).collect();
        for row in &rows {
            let priority: String = row.get("priority");
            let n: i64 = row.get("n");
            counts.insert(priority_from_str(&priority), n);
        }
        Ok(counts)
    }

    /// Count jobs currently held in the scheduled index.
    pub async fn scheduled_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM call_jobs WHERE status = 'scheduled'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Evict terminal jobs older than `retention`, for periodic cleanup.
    pub async fn evict_expired_terminal(&self, retention: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let res = sqlx::query(
            "DELETE FROM call_jobs WHERE status IN ('completed','failed','missed','cancelled') \
             AND updated_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        let n = res.rows_affected();
        if n > 0 {
            warn!(count = n, "evicted expired terminal jobs");
        }
        Ok(n)
    }
}

fn priority_str(p: Priority) -> &'static str {
    match p {
        Priority::Low => "low",
        Priority::Normal => "normal",
        Priority::High => "high",
        Priority::Urgent => "urgent",
    }
}

fn priority_from_str(s: &str) -> Priority {
    match s {
        "low" => Priority::Low,
        "high" => Priority::High,
        "urgent" => Priority::Urgent,
        _ => Priority::Normal,
    }
}

/// Flat row representation, JSON-encoding the nested domain fields.
struct JobRow {
    id: String,
    phone_number: String,
    campaign_id: String,
    call_config: String,
    priority: String,
    scheduled_at: Option<DateTime<Utc>>,
    max_retries: i64,
    retry_count: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    attempt_log: String,
    result: Option<String>,
    active_since: Option<DateTime<Utc>>,
    owning_worker: Option<String>,
}

impl JobRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            phone_number: row.try_get("phone_number")?,
            campaign_id: row.try_get("campaign_id")?,
            call_config: row.try_get("call_config")?,
            priority: row.try_get("priority")?,
            scheduled_at: row.try_get("scheduled_at")?,
            max_retries: row.try_get("max_retries")?,
            retry_count: row.try_get("retry_count")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            attempt_log: row.try_get("attempt_log")?,
            result: row.try_get("result")?,
            active_since: row.try_get("active_since")?,
            owning_worker: row.try_get("owning_worker")?,
        })
    }

    fn from_domain(job: &CallJob) -> Self {
        Self {
            id: job.id.clone(),
            phone_number: job.phone_number.clone(),
            campaign_id: job.campaign_id.clone(),
            call_config: serde_json::to_string(&job.call_config).unwrap_or_default(),
            priority: priority_str(job.priority).to_string(),
            scheduled_at: job.scheduled_at,
            max_retries: job.max_retries as i64,
            retry_count: job.retry_count as i64,
            status: job.status.as_str().to_string(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            attempt_log: serde_json::to_string(&job.attempt_log).unwrap_or_default(),
            result: job
                .result
                .as_ref()
                .map(|r| serde_json::to_string(r).unwrap_or_default()),
            active_since: None,
            owning_worker: None,
        }
    }

    fn into_domain(self) -> Result<CallJob> {
        let call_config: HashMap<String, Value> =
            serde_json::from_str(&self.call_config).unwrap_or_default();
        let attempt_log: Vec<AttemptRecord> =
            serde_json::from_str(&self.attempt_log).unwrap_or_default();
        let result: Option<CallResult> = match self.result {
            Some(s) => serde_json::from_str(&s).ok(),
            None => None,
        };
        let status = JobStatus::from_str(&self.status)
            .ok_or_else(|| EngineError::internal(format!("unknown status {}", self.status)))?;

        Ok(CallJob {
            id: self.id,
            phone_number: self.phone_number,
            campaign_id: self.campaign_id,
            call_config,
            priority: priority_from_str(&self.priority),
            scheduled_at: self.scheduled_at,
            max_retries: self.max_retries as u32,
            retry_count: self.retry_count as u32,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            attempt_log,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn job(id: &str, priority: Priority) -> CallJob {
        CallJob::new(id, "+15550001", "camp", HashMap::new(), priority, None, 3)
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let store = StateStore::new_in_memory().await.unwrap();
        let j = job("a1", Priority::Normal);
        assert_eq!(store.put(&j).await.unwrap(), PutOutcome::Created);
        assert_eq!(store.put(&j).await.unwrap(), PutOutcome::Exists);
    }

    #[tokio::test]
    async fn pop_ready_respects_priority_order() {
        let store = StateStore::new_in_memory().await.unwrap();
        store.put(&job("low", Priority::Low)).await.unwrap();
        store.put(&job("urgent", Priority::Urgent)).await.unwrap();

        let popped = store.pop_ready(1, "w1").await.unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].id, "urgent");
    }

    #[tokio::test]
    async fn promote_due_moves_scheduled_jobs_to_pending() {
        let store = StateStore::new_in_memory().await.unwrap();
        let at = Utc::now() - chrono::Duration::seconds(1);
        let mut j = job("sched1", Priority::Normal);
        j.status = JobStatus::Scheduled;
        j.scheduled_at = Some(at);
        store.put(&j).await.unwrap();

        let promoted = store.promote_due(Utc::now()).await.unwrap();
        assert_eq!(promoted, vec!["sched1".to_string()]);

        let reloaded = store.get("sched1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn update_rejects_overwriting_terminal_status() {
        let store = StateStore::new_in_memory().await.unwrap();
        let j = job("t1", Priority::Normal);
        store.put(&j).await.unwrap();
        store
            .update(
                "t1",
                JobPatch {
                    status: Some(JobStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = store
            .update(
                "t1",
                JobPatch {
                    status: Some(JobStatus::Failed),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn release_clears_active_marker() {
        let store = StateStore::new_in_memory().await.unwrap();
        store.put(&job("r1", Priority::Normal)).await.unwrap();
        store.pop_ready(1, "w1").await.unwrap();
        assert_eq!(store.active_count().await.unwrap(), 1);
        store.release("r1").await.unwrap();
        assert_eq!(store.active_count().await.unwrap(), 0);
    }
}
