//! The job envelope and its lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reportworks_core::{JobId, ReportFilters, ReportType};

use crate::queue::{EnqueueRequest, WorkerToken};

/// Job execution status.
///
/// `Completed` and `Failed` are terminal; a retryable failure returns the job
/// to `Waiting` through a retry boundary that increments `attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting for a lease (possibly behind a backoff gate).
    Waiting,
    /// Currently held under a lease.
    Active,
    /// Finished successfully; outcome carries the result summary.
    Completed,
    /// Failed permanently; visible in the dead-letter view.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// The live lease on an `Active` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    /// Worker currently holding the lease.
    pub worker: WorkerToken,
    /// Fencing generation; incremented on every lease of this job.
    pub generation: u64,
    /// Past this instant the job is reclaimable by another worker.
    pub expires_at: DateTime<Utc>,
}

/// Terminal summary recorded at ack time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { rows: usize, recipient: String },
    Failed { reason: String },
}

/// A queued report job.
///
/// The request fields (`report_type`, `filters`, `report_name`, `email_to`,
/// `created_at`) are immutable after enqueue; everything else is owned by the
/// queue and mutated only through its operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: JobId,
    pub report_type: ReportType,
    pub filters: ReportFilters,
    /// Display name; also the basis of the attachment filename.
    pub report_name: String,
    pub email_to: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: JobStatus,
    /// 0-100, non-decreasing within one lease, reset to 0 on re-lease.
    pub progress: u8,
    /// Number of leases taken so far (1 on the first execution).
    pub attempt: u32,
    pub lease: Option<LeaseInfo>,
    /// Backoff gate for a retrying job; `None` means immediately ready.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Most recent failure reason, kept across retries.
    pub last_error: Option<String>,
    pub outcome: Option<JobOutcome>,
}

impl JobEnvelope {
    /// Build a fresh `Waiting` envelope from an enqueue request.
    pub fn new(request: EnqueueRequest) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            report_type: request.report_type,
            filters: request.filters,
            report_name: request.report_name,
            email_to: request.email_to,
            created_at: now,
            updated_at: now,
            status: JobStatus::Waiting,
            progress: 0,
            attempt: 0,
            lease: None,
            next_attempt_at: None,
            last_error: None,
            outcome: None,
        }
    }

    /// Fencing generation of the current or most recent lease.
    pub fn lease_generation(&self) -> u64 {
        self.lease.as_ref().map(|l| l.generation).unwrap_or(0)
    }

    /// Whether a `lease()` call may claim this job right now.
    pub fn is_leasable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Waiting => self.next_attempt_at.map_or(true, |at| at <= now),
            JobStatus::Active => self
                .lease
                .as_ref()
                .map_or(true, |l| l.expires_at <= now),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }

    /// Flip to `Active` under a new lease.
    ///
    /// Increments `attempt`, bumps the fencing generation and resets
    /// `progress` — any progress observed from a previous (dead) lease is
    /// superseded.
    pub fn begin_lease(
        &mut self,
        worker: &WorkerToken,
        lease_timeout: chrono::Duration,
        now: DateTime<Utc>,
    ) {
        let generation = self.lease_generation() + 1;
        self.status = JobStatus::Active;
        self.attempt += 1;
        self.progress = 0;
        self.next_attempt_at = None;
        self.lease = Some(LeaseInfo {
            worker: worker.clone(),
            generation,
            expires_at: now + lease_timeout,
        });
        self.updated_at = now;
    }

    /// Record a successful outcome and complete the job.
    pub fn complete(&mut self, rows: usize, recipient: String, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.outcome = Some(JobOutcome::Completed { rows, recipient });
        self.updated_at = now;
    }

    /// Return the job to `Waiting` behind a backoff gate.
    pub fn schedule_retry(&mut self, reason: String, delay: chrono::Duration, now: DateTime<Utc>) {
        self.status = JobStatus::Waiting;
        self.last_error = Some(reason);
        self.next_attempt_at = Some(now + delay);
        self.updated_at = now;
    }

    /// Fail the job permanently; it becomes part of the dead-letter view.
    pub fn fail(&mut self, reason: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(reason.clone());
        self.outcome = Some(JobOutcome::Failed { reason });
        self.updated_at = now;
    }

    /// Raise progress; never lowers it.
    pub fn raise_progress(&mut self, percent: u8, now: DateTime<Utc>) {
        let percent = percent.min(100);
        if percent > self.progress {
            self.progress = percent;
            self.updated_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportworks_core::{ProductSalesFilters, ReportFilters, ReportType};

    fn request() -> EnqueueRequest {
        EnqueueRequest {
            report_type: ReportType::ProductSales,
            filters: ReportFilters::ProductSales(ProductSalesFilters::default()),
            report_name: "Vendor Sales".to_string(),
            email_to: "ops@example.com".to_string(),
        }
    }

    fn worker() -> WorkerToken {
        WorkerToken::new("worker-0")
    }

    #[test]
    fn new_envelope_starts_waiting() {
        let job = JobEnvelope::new(request());
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.progress, 0);
        assert!(job.is_leasable(Utc::now()));
    }

    #[test]
    fn lease_increments_attempt_and_generation() {
        let mut job = JobEnvelope::new(request());
        let now = Utc::now();

        job.begin_lease(&worker(), chrono::Duration::seconds(30), now);
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.lease_generation(), 1);
        assert!(!job.is_leasable(now));

        // Expired lease makes the job reclaimable with a fresh generation.
        let later = now + chrono::Duration::seconds(31);
        assert!(job.is_leasable(later));
        job.raise_progress(40, later);
        job.begin_lease(&worker(), chrono::Duration::seconds(30), later);
        assert_eq!(job.attempt, 2);
        assert_eq!(job.lease_generation(), 2);
        assert_eq!(job.progress, 0, "re-lease resets progress");
    }

    #[test]
    fn progress_is_monotonic() {
        let mut job = JobEnvelope::new(request());
        let now = Utc::now();
        job.begin_lease(&worker(), chrono::Duration::seconds(30), now);

        job.raise_progress(20, now);
        job.raise_progress(10, now);
        assert_eq!(job.progress, 20);
        job.raise_progress(250, now);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn retry_gates_behind_backoff() {
        let mut job = JobEnvelope::new(request());
        let now = Utc::now();
        job.begin_lease(&worker(), chrono::Duration::seconds(30), now);
        job.schedule_retry("smtp timeout".to_string(), chrono::Duration::seconds(5), now);

        assert_eq!(job.status, JobStatus::Waiting);
        assert!(!job.is_leasable(now));
        assert!(job.is_leasable(now + chrono::Duration::seconds(6)));
        assert_eq!(job.last_error.as_deref(), Some("smtp timeout"));
    }

    #[test]
    fn terminal_states_are_not_leasable() {
        let now = Utc::now();

        let mut done = JobEnvelope::new(request());
        done.complete(3, "ops@example.com".to_string(), now);
        assert!(done.status.is_terminal());
        assert!(!done.is_leasable(now));
        assert_eq!(done.progress, 100);

        let mut dead = JobEnvelope::new(request());
        dead.fail("no builder".to_string(), now);
        assert!(dead.status.is_terminal());
        assert!(!dead.is_leasable(now));
        assert!(matches!(dead.outcome, Some(JobOutcome::Failed { .. })));
    }
}
