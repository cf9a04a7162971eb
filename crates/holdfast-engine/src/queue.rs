// Copyright (C) 2025 Holdfast Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable job queue.
//!
//! A persistent, at-least-once, time-ordered work queue over the
//! `jobs` table. Each named queue is drained by exactly one
//! [`QueueConsumer`] (concurrency 1), so invocations of the same
//! engine never overlap; different queues run concurrently with
//! respect to each other. Claims take a lease, so even independent
//! processes polling the same table never run the same job twice.
//!
//! Repeating jobs re-arm themselves at the next epoch-aligned
//! boundary after every run, so independently started processes agree
//! on tick times purely from the wall clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Queue drained by the crafting engine.
pub const QUEUE_CRAFTING: &str = "crafting";
/// Queue drained by the upkeep/decay engine.
pub const QUEUE_UPKEEP: &str = "upkeep";
/// Queue drained by the transfer engine.
pub const QUEUE_TRANSFERS: &str = "transfers";
/// Queue drained by the victory engine.
pub const QUEUE_VICTORY: &str = "victory";

/// Delay before a failed job is retried.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// How long a claim lease holds before another claimer may take the
/// job over, bounding the damage of a process that dies mid-job.
const CLAIM_LEASE: Duration = Duration::from_secs(60);

/// Compute the next epoch-aligned tick boundary strictly after `now`.
///
/// `next = now + (every - now mod every)` over milliseconds since the
/// Unix epoch: any two processes evaluating this at the same instant
/// get the same boundary, with no coordination.
pub fn next_tick(now: DateTime<Utc>, every: Duration) -> DateTime<Utc> {
    let every_ms = every.as_millis().max(1) as i64;
    let now_ms = now.timestamp_millis();
    let next_ms = now_ms + (every_ms - now_ms.rem_euclid(every_ms));
    Utc.timestamp_millis_opt(next_ms)
        .single()
        .unwrap_or(now + every)
}

/// A persisted job row.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Job identifier.
    pub id: Uuid,
    /// Named queue the job belongs to.
    pub queue_name: String,
    /// Handler dispatch name.
    pub job_name: String,
    /// JSON payload.
    pub payload: serde_json::Value,
    /// Unique key for cancel/replace semantics, if any.
    pub unique_key: Option<String>,
    /// When the job becomes due.
    pub run_at: DateTime<Utc>,
    /// Repeat interval in milliseconds for repeating jobs.
    pub every_ms: Option<i64>,
    /// Failed attempts so far.
    pub attempts: i32,
    /// Attempts after which the job is dropped.
    pub max_attempts: i32,
    /// When the current claim lease was taken, if claimed.
    pub claimed_at: Option<DateTime<Utc>>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
}

/// Durable job queue surface.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job to run immediately.
    async fn enqueue(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        unique_key: Option<&str>,
    ) -> Result<Uuid>;

    /// Enqueue a job to run after a delay. A `unique_key` held by an
    /// existing job replaces that job (implicit cancellation).
    async fn enqueue_delayed(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        unique_key: Option<&str>,
        delay: Duration,
    ) -> Result<Uuid>;

    /// Enqueue (or re-arm) a repeating job. First run happens at the
    /// next epoch-aligned boundary; the key `repeat:{queue}:{job}`
    /// makes re-arming on boot idempotent.
    async fn enqueue_repeating(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        every: Duration,
    ) -> Result<Uuid>;

    /// Cancel a job by unique key. Returns whether a job was removed.
    async fn cancel_by_key(&self, unique_key: &str) -> Result<bool>;

    /// Claim due jobs for one queue, oldest first. Claimed jobs carry
    /// a lease: other claimers skip them until they are completed,
    /// failed, or the lease goes stale, so independent processes
    /// polling the same table never execute the same job twice. Jobs
    /// stay persisted until completed or dropped, so a crash mid-batch
    /// re-delivers them after the lease expires.
    async fn claim_due(&self, queue: &str, now: DateTime<Utc>, limit: i64)
        -> Result<Vec<JobRecord>>;

    /// Mark a job done: repeating jobs re-arm at the next aligned
    /// boundary, one-shot jobs are deleted.
    async fn complete(&self, job: &JobRecord) -> Result<()>;

    /// Record a failed attempt. Returns `true` if the job was dropped
    /// because it exhausted its attempts.
    async fn fail(&self, job: &JobRecord) -> Result<bool>;
}

/// SQLite-backed job queue over the `jobs` table.
#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
    max_attempts: i32,
}

impl SqliteJobQueue {
    /// Create a queue handle over an existing (migrated) pool.
    pub fn new(pool: SqlitePool, max_attempts: i32) -> Self {
        Self { pool, max_attempts }
    }

    async fn insert(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        unique_key: Option<&str>,
        run_at: DateTime<Utc>,
        every_ms: Option<i64>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let payload_json = serde_json::to_string(&payload)?;

        if let Some(key) = unique_key {
            // Replace-by-key: enqueueing under a held key implicitly
            // cancels the previous job.
            sqlx::query("DELETE FROM jobs WHERE unique_key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO jobs (id, queue_name, job_name, payload, unique_key,
                              run_at, every_ms, attempts, max_attempts, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(queue)
        .bind(job_name)
        .bind(payload_json)
        .bind(unique_key)
        .bind(run_at)
        .bind(every_ms)
        .bind(self.max_attempts)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::QueueError {
            operation: "enqueue".to_string(),
            details: e.to_string(),
        })?;

        Ok(id)
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    queue_name: String,
    job_name: String,
    payload: String,
    unique_key: Option<String>,
    run_at: DateTime<Utc>,
    every_ms: Option<i64>,
    attempts: i64,
    max_attempts: i64,
    claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = EngineError;

    fn try_from(row: JobRow) -> Result<Self> {
        let payload: serde_json::Value =
            serde_json::from_str(&row.payload).map_err(|e| EngineError::InvalidRecord {
                entity: "jobs".to_string(),
                details: format!("bad payload json: {}", e),
            })?;
        Ok(JobRecord {
            id: Uuid::parse_str(&row.id).map_err(|e| EngineError::InvalidRecord {
                entity: "jobs".to_string(),
                details: format!("bad id '{}': {}", row.id, e),
            })?,
            queue_name: row.queue_name,
            job_name: row.job_name,
            payload,
            unique_key: row.unique_key,
            run_at: row.run_at,
            every_ms: row.every_ms,
            attempts: row.attempts as i32,
            max_attempts: row.max_attempts as i32,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        unique_key: Option<&str>,
    ) -> Result<Uuid> {
        self.insert(queue, job_name, payload, unique_key, Utc::now(), None)
            .await
    }

    async fn enqueue_delayed(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        unique_key: Option<&str>,
        delay: Duration,
    ) -> Result<Uuid> {
        let run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.insert(queue, job_name, payload, unique_key, run_at, None)
            .await
    }

    async fn enqueue_repeating(
        &self,
        queue: &str,
        job_name: &str,
        payload: serde_json::Value,
        every: Duration,
    ) -> Result<Uuid> {
        let key = format!("repeat:{}:{}", queue, job_name);
        let run_at = next_tick(Utc::now(), every);
        self.insert(
            queue,
            job_name,
            payload,
            Some(&key),
            run_at,
            Some(every.as_millis() as i64),
        )
        .await
    }

    async fn cancel_by_key(&self, unique_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE unique_key = ?")
            .bind(unique_key)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::QueueError {
                operation: "cancel_by_key".to_string(),
                details: e.to_string(),
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_due(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<JobRecord>> {
        let lease_cutoff = now
            - chrono::Duration::from_std(CLAIM_LEASE)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut tx = self.pool.begin().await.map_err(|e| EngineError::QueueError {
            operation: "claim_due".to_string(),
            details: e.to_string(),
        })?;

        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE queue_name = ? AND run_at <= ?
              AND (claimed_at IS NULL OR claimed_at <= ?)
            ORDER BY run_at
            LIMIT ?
            "#,
        )
        .bind(queue)
        .bind(now)
        .bind(lease_cutoff)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| EngineError::QueueError {
            operation: "claim_due".to_string(),
            details: e.to_string(),
        })?;

        // Take the lease in the same transaction so two claimers never
        // both see a job unclaimed.
        for row in &rows {
            sqlx::query("UPDATE jobs SET claimed_at = ? WHERE id = ?")
                .bind(now)
                .bind(&row.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn complete(&self, job: &JobRecord) -> Result<()> {
        match job.every_ms {
            Some(every_ms) => {
                let every = Duration::from_millis(every_ms.max(1) as u64);
                let run_at = next_tick(Utc::now(), every);
                sqlx::query("UPDATE jobs SET run_at = ?, attempts = 0, claimed_at = NULL WHERE id = ?")
                    .bind(run_at)
                    .bind(job.id.to_string())
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM jobs WHERE id = ?")
                    .bind(job.id.to_string())
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn fail(&self, job: &JobRecord) -> Result<bool> {
        let attempts = job.attempts + 1;

        if attempts >= job.max_attempts && job.every_ms.is_none() {
            sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(job.id.to_string())
                .execute(&self.pool)
                .await?;
            return Ok(true);
        }

        // Repeating jobs never drop; they move to the next boundary.
        let run_at = match job.every_ms {
            Some(every_ms) => next_tick(Utc::now(), Duration::from_millis(every_ms.max(1) as u64)),
            None => {
                Utc::now()
                    + chrono::Duration::from_std(RETRY_BACKOFF)
                        .unwrap_or_else(|_| chrono::Duration::seconds(5))
            }
        };
        sqlx::query("UPDATE jobs SET run_at = ?, attempts = ?, claimed_at = NULL WHERE id = ?")
            .bind(run_at)
            .bind(attempts)
            .bind(job.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(false)
    }
}

/// Handler invoked by a consumer for each due job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one job.
    async fn handle(&self, job: &JobRecord) -> Result<()>;
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How often to poll for due jobs.
    pub poll_interval: Duration,
    /// Maximum jobs to process per poll.
    pub batch_size: i64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
        }
    }
}

/// Single consumer for one named queue (concurrency 1).
///
/// Runs as a background task: polls for due jobs, invokes the handler
/// sequentially, and isolates failures per job so one bad entity never
/// blocks the rest of the queue.
pub struct QueueConsumer {
    queue_name: String,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: ConsumerConfig,
    shutdown: Arc<Notify>,
}

impl QueueConsumer {
    /// Create a consumer for a named queue.
    pub fn new(
        queue_name: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            queue,
            handler,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the consumer loop until shutdown.
    pub async fn run(self) {
        info!(
            queue = %self.queue_name,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Queue consumer started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(queue = %self.queue_name, "Queue consumer shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.drain_due().await {
                        error!(queue = %self.queue_name, error = %e, "Failed to drain due jobs");
                    }
                }
            }
        }
    }

    /// Process all currently-due jobs, one at a time.
    async fn drain_due(&self) -> Result<()> {
        let jobs = self
            .queue
            .claim_due(&self.queue_name, Utc::now(), self.config.batch_size)
            .await?;

        if jobs.is_empty() {
            debug!(queue = %self.queue_name, "No due jobs");
            return Ok(());
        }

        for job in jobs {
            match self.handler.handle(&job).await {
                Ok(()) => {
                    self.queue.complete(&job).await?;
                }
                Err(e) if e.is_retryable() => {
                    let dropped = self.queue.fail(&job).await?;
                    if dropped {
                        error!(
                            queue = %self.queue_name,
                            job = %job.job_name,
                            job_id = %job.id,
                            error = %e,
                            "Job dropped after exhausting attempts"
                        );
                    } else {
                        warn!(
                            queue = %self.queue_name,
                            job = %job.job_name,
                            job_id = %job.id,
                            attempt = job.attempts + 1,
                            error = %e,
                            "Job failed, will retry"
                        );
                    }
                }
                Err(e) => {
                    // Data problems don't improve with retries; drop the
                    // job so it cannot wedge the queue.
                    error!(
                        queue = %self.queue_name,
                        job = %job.job_name,
                        job_id = %job.id,
                        error = %e,
                        "Job failed with non-retryable error, dropping"
                    );
                    self.queue.complete(&job).await?;
                }
            }
        }

        Ok(())
    }
}
