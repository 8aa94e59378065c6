//! SQLite-backed durable queue.
//!
//! The authoritative job state is the serialized [`JobEnvelope`] in the `data`
//! column; status and timing columns are derived copies used for claim
//! queries. State survives process restart: a reopened queue resumes
//! `Waiting` jobs and reclaims `Active` jobs whose lease has expired.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};
use tokio::runtime::Runtime;
use tracing::debug;

use reportworks_core::JobId;

use crate::envelope::{JobEnvelope, JobStatus};
use crate::queue::{
    apply_ack, AckDisposition, AckOutcome, EnqueueRequest, JobQueue, LeaseToken, LeasedJob,
    QueueConfig, QueueError, QueueStats, WorkerToken,
};

/// Durable queue over a single SQLite database.
///
/// The trait surface is synchronous; sqlx calls run on a dedicated runtime via
/// `block_on`. The pool is capped at one connection so the claim path holds
/// writer exclusivity for the whole lease transaction.
pub struct SqliteQueue {
    config: QueueConfig,
    rt: Runtime,
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteQueue").finish_non_exhaustive()
    }
}

fn storage(err: impl std::fmt::Display) -> QueueError {
    QueueError::Storage(err.to_string())
}

impl SqliteQueue {
    /// Open (creating if missing) a queue database at `path`.
    pub fn open(path: impl AsRef<Path>, config: QueueConfig) -> Result<Self, QueueError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::connect(options, config)
    }

    /// Open a private in-memory queue (tests/dev; not durable).
    pub fn open_in_memory(config: QueueConfig) -> Result<Self, QueueError> {
        Self::connect(SqliteConnectOptions::new().in_memory(true), config)
    }

    fn connect(options: SqliteConnectOptions, config: QueueConfig) -> Result<Self, QueueError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(storage)?;

        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        })
        .map_err(storage)?;

        rt.block_on(async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS jobs (
                    id                  TEXT PRIMARY KEY,
                    status              TEXT NOT NULL,
                    created_at_ms       INTEGER NOT NULL,
                    next_attempt_at_ms  INTEGER,
                    lease_expires_at_ms INTEGER,
                    data                TEXT NOT NULL
                )
                "#,
            )
            .execute(&pool)
            .await?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status, created_at_ms)",
            )
            .execute(&pool)
            .await
        })
        .map_err(storage)?;

        Ok(Self { config, rt, pool })
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn opt_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(millis)
}

fn decode(data: &str) -> Result<JobEnvelope, QueueError> {
    serde_json::from_str(data).map_err(storage)
}

async fn write_back(
    tx: &mut Transaction<'_, Sqlite>,
    job: &JobEnvelope,
) -> Result<(), QueueError> {
    let data = serde_json::to_string(job).map_err(storage)?;
    sqlx::query(
        r#"
        UPDATE jobs
        SET status = ?1, next_attempt_at_ms = ?2, lease_expires_at_ms = ?3, data = ?4
        WHERE id = ?5
        "#,
    )
    .bind(job.status.as_str())
    .bind(opt_millis(job.next_attempt_at))
    .bind(opt_millis(job.lease.as_ref().map(|l| l.expires_at)))
    .bind(data)
    .bind(job.id.to_string())
    .execute(&mut **tx)
    .await
    .map_err(storage)?;
    Ok(())
}

async fn load_for_update(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: JobId,
) -> Result<Option<JobEnvelope>, QueueError> {
    let row = sqlx::query("SELECT data FROM jobs WHERE id = ?1")
        .bind(job_id.to_string())
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?;
    match row {
        Some(row) => {
            let data: String = row.try_get("data").map_err(storage)?;
            Ok(Some(decode(&data)?))
        }
        None => Ok(None),
    }
}

impl JobQueue for SqliteQueue {
    fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, QueueError> {
        let job = JobEnvelope::new(request);
        let id = job.id;
        let data = serde_json::to_string(&job).map_err(storage)?;

        self.rt.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO jobs (id, status, created_at_ms, next_attempt_at_ms,
                                  lease_expires_at_ms, data)
                VALUES (?1, ?2, ?3, NULL, NULL, ?4)
                "#,
            )
            .bind(id.to_string())
            .bind(job.status.as_str())
            .bind(millis(job.created_at))
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(storage)
        })?;

        debug!(job_id = %id, "enqueued job");
        Ok(id)
    }

    fn lease(&self, worker: &WorkerToken, max: usize) -> Result<Vec<LeasedJob>, QueueError> {
        let now = Utc::now();
        let lease_timeout = self.config.lease_timeout_chrono();

        self.rt.block_on(async {
            let mut tx = self.pool.begin().await.map_err(storage)?;

            let rows = sqlx::query(
                r#"
                SELECT data FROM jobs
                WHERE (status = 'waiting'
                       AND (next_attempt_at_ms IS NULL OR next_attempt_at_ms <= ?1))
                   OR (status = 'active'
                       AND (lease_expires_at_ms IS NULL OR lease_expires_at_ms <= ?1))
                ORDER BY created_at_ms ASC
                LIMIT ?2
                "#,
            )
            .bind(millis(now))
            .bind(max as i64)
            .fetch_all(&mut *tx)
            .await
            .map_err(storage)?;

            let mut leased = Vec::with_capacity(rows.len());
            for row in rows {
                let data: String = row.try_get("data").map_err(storage)?;
                let mut job = decode(&data)?;
                job.begin_lease(worker, lease_timeout, now);
                write_back(&mut tx, &job).await?;
                leased.push(LeasedJob {
                    token: LeaseToken {
                        job_id: job.id,
                        generation: job.lease_generation(),
                    },
                    envelope: job,
                });
            }

            tx.commit().await.map_err(storage)?;
            Ok(leased)
        })
    }

    fn ack(&self, token: &LeaseToken, outcome: AckOutcome) -> Result<AckDisposition, QueueError> {
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await.map_err(storage)?;
            let mut job = load_for_update(&mut tx, token.job_id)
                .await?
                .ok_or(QueueError::NotFound(token.job_id))?;

            let disposition = apply_ack(&mut job, token, outcome, &self.config, Utc::now())?;
            write_back(&mut tx, &job).await?;
            tx.commit().await.map_err(storage)?;
            Ok(disposition)
        })
    }

    fn update_progress(&self, token: &LeaseToken, percent: u8) -> Result<(), QueueError> {
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await.map_err(storage)?;
            let Some(mut job) = load_for_update(&mut tx, token.job_id).await? else {
                return Ok(());
            };
            if job.status == JobStatus::Active && job.lease_generation() == token.generation {
                job.raise_progress(percent, Utc::now());
                write_back(&mut tx, &job).await?;
                tx.commit().await.map_err(storage)?;
            }
            Ok(())
        })
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobEnvelope>, QueueError> {
        self.rt.block_on(async {
            let row = sqlx::query("SELECT data FROM jobs WHERE id = ?1")
                .bind(job_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
            match row {
                Some(row) => {
                    let data: String = row.try_get("data").map_err(storage)?;
                    Ok(Some(decode(&data)?))
                }
                None => Ok(None),
            }
        })
    }

    fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobEnvelope>, QueueError> {
        self.rt.block_on(async {
            let rows = match status {
                Some(status) => {
                    sqlx::query(
                        "SELECT data FROM jobs WHERE status = ?1 \
                         ORDER BY created_at_ms ASC LIMIT ?2",
                    )
                    .bind(status.as_str())
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
                }
                None => {
                    sqlx::query("SELECT data FROM jobs ORDER BY created_at_ms ASC LIMIT ?1")
                        .bind(limit as i64)
                        .fetch_all(&self.pool)
                        .await
                }
            }
            .map_err(storage)?;

            let mut jobs = Vec::with_capacity(rows.len());
            for row in rows {
                let data: String = row.try_get("data").map_err(storage)?;
                jobs.push(decode(&data)?);
            }
            Ok(jobs)
        })
    }

    fn dead_letters(&self, limit: usize) -> Result<Vec<JobEnvelope>, QueueError> {
        self.list(Some(JobStatus::Failed), limit)
    }

    fn remove_waiting(&self, job_id: JobId) -> Result<bool, QueueError> {
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await.map_err(storage)?;
            let Some(job) = load_for_update(&mut tx, job_id).await? else {
                return Ok(false);
            };
            if job.status != JobStatus::Waiting {
                return Err(QueueError::NotWaiting(job_id));
            }
            sqlx::query("DELETE FROM jobs WHERE id = ?1")
                .bind(job_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            tx.commit().await.map_err(storage)?;
            Ok(true)
        })
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        self.rt.block_on(async {
            let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;

            let mut stats = QueueStats::default();
            for row in rows {
                let status: String = row.try_get("status").map_err(storage)?;
                let n: i64 = row.try_get("n").map_err(storage)?;
                match status.parse::<JobStatus>().map_err(QueueError::Storage)? {
                    JobStatus::Waiting => stats.waiting = n as usize,
                    JobStatus::Active => stats.active = n as usize,
                    JobStatus::Completed => stats.completed = n as usize,
                    JobStatus::Failed => stats.failed = n as usize,
                }
            }
            Ok(stats)
        })
    }
}
