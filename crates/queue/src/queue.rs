//! The queue contract shared by the in-memory and SQLite stores.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use reportworks_core::{JobId, ReportFilters, ReportType};

use crate::envelope::{JobEnvelope, JobStatus};
use crate::policy::RetryPolicy;

/// Identity of a worker, carried on leases for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerToken(String);

impl WorkerToken {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for WorkerToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fencing token for one lease of one job.
///
/// Acks and progress updates carry this token; the queue rejects any token
/// whose generation no longer matches the job's current lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseToken {
    pub job_id: JobId,
    pub generation: u64,
}

/// A job handed to a worker together with its fencing token.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub envelope: JobEnvelope,
    pub token: LeaseToken,
}

/// What the external collaborator submits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub report_type: ReportType,
    pub filters: ReportFilters,
    pub report_name: String,
    pub email_to: String,
}

/// Worker-reported result of one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    Success {
        rows: usize,
        recipient: String,
    },
    Failure {
        reason: String,
        /// Transient faults are retryable; validation and policy faults are
        /// not.
        retryable: bool,
    },
}

/// What the queue actually did with an ack, so callers can report it.
#[derive(Debug, Clone, PartialEq)]
pub enum AckDisposition {
    Completed,
    /// Retryable failure with budget left; the job is `Waiting` again.
    Retrying {
        attempt: u32,
        next_attempt_at: chrono::DateTime<chrono::Utc>,
    },
    /// Permanent failure (or exhausted budget); the job is dead-lettered.
    Failed,
    /// The job was already terminal; nothing changed.
    AlreadyTerminal,
}

/// Queue behaviour knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum lease hold before the job becomes reclaimable.
    pub lease_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn lease_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease_timeout).unwrap_or(chrono::Duration::seconds(120))
    }
}

/// Queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("stale lease for job {job_id}: held generation {held}, current {current}")]
    StaleLease {
        job_id: JobId,
        held: u64,
        current: u64,
    },
    #[error("job {0} is not waiting")]
    NotWaiting(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Counts per status for the operator console.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// The durable queue contract.
///
/// All methods are safe to call from multiple worker threads; the claim path
/// inside `lease` is the queue's only mutual-exclusion point.
pub trait JobQueue: Send + Sync {
    /// Append a new job in `Waiting` state and return its identity.
    ///
    /// Never blocks on worker availability; storage faults propagate.
    fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, QueueError>;

    /// Atomically claim up to `max` ready jobs.
    ///
    /// Ready means `Waiting` past its backoff gate, or `Active` with an
    /// expired lease (reclamation). No two concurrent calls receive the same
    /// job.
    fn lease(&self, worker: &WorkerToken, max: usize) -> Result<Vec<LeasedJob>, QueueError>;

    /// Report the outcome of a leased execution.
    ///
    /// A stale token is rejected with [`QueueError::StaleLease`]; acking an
    /// already-terminal job with the current generation is a no-op.
    fn ack(&self, token: &LeaseToken, outcome: AckOutcome) -> Result<AckDisposition, QueueError>;

    /// Advisory progress update; best-effort.
    ///
    /// Stale tokens and non-active jobs are silently ignored — losing a
    /// progress update never affects completion or failure.
    fn update_progress(&self, token: &LeaseToken, percent: u8) -> Result<(), QueueError>;

    /// Fetch one job.
    fn get(&self, job_id: JobId) -> Result<Option<JobEnvelope>, QueueError>;

    /// Point-in-time listing, oldest first, optionally filtered by status.
    fn list(&self, status: Option<JobStatus>, limit: usize)
        -> Result<Vec<JobEnvelope>, QueueError>;

    /// Permanently failed jobs, oldest first.
    fn dead_letters(&self, limit: usize) -> Result<Vec<JobEnvelope>, QueueError>;

    /// Remove a job that has never been leased for this attempt.
    ///
    /// Returns `false` if the job does not exist; a job that is active or
    /// terminal is reported via [`QueueError::NotWaiting`].
    fn remove_waiting(&self, job_id: JobId) -> Result<bool, QueueError>;

    /// Counts per status.
    fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// Apply an ack to a loaded envelope. Shared by both stores so fencing,
/// idempotency and the retry budget behave identically.
pub(crate) fn apply_ack(
    job: &mut JobEnvelope,
    token: &LeaseToken,
    outcome: AckOutcome,
    config: &QueueConfig,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<AckDisposition, QueueError> {
    let current = job.lease_generation();
    if current != token.generation {
        return Err(QueueError::StaleLease {
            job_id: job.id,
            held: token.generation,
            current,
        });
    }
    if job.status.is_terminal() {
        return Ok(AckDisposition::AlreadyTerminal);
    }

    match outcome {
        AckOutcome::Success { rows, recipient } => {
            job.complete(rows, recipient, now);
            Ok(AckDisposition::Completed)
        }
        AckOutcome::Failure { reason, retryable } => {
            if retryable && config.retry.should_retry(job.attempt) {
                let delay = config.retry.delay_after_attempt(job.attempt);
                let delay = chrono::Duration::from_std(delay).unwrap_or_default();
                job.schedule_retry(reason, delay, now);
                Ok(AckDisposition::Retrying {
                    attempt: job.attempt,
                    next_attempt_at: now + delay,
                })
            } else {
                job.fail(reason, now);
                Ok(AckDisposition::Failed)
            }
        }
    }
}
