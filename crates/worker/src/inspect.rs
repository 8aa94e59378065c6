//! Read-only queue projection for the operator console.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use reportworks_core::{JobId, ReportType};
use reportworks_queue::{JobEnvelope, JobOutcome, JobQueue, JobStatus, QueueError, QueueStats};

/// One row in the console's job listing.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub report_type: ReportType,
    pub report_name: String,
    pub status: JobStatus,
    pub progress: u8,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobEnvelope> for JobSummary {
    fn from(job: &JobEnvelope) -> Self {
        Self {
            id: job.id,
            report_type: job.report_type,
            report_name: job.report_name.clone(),
            status: job.status,
            progress: job.progress,
            attempt: job.attempt,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Full detail of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub email_to: String,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub outcome: Option<JobOutcome>,
    /// Worker currently holding the lease, if any.
    pub leased_by: Option<String>,
}

impl From<&JobEnvelope> for JobDetail {
    fn from(job: &JobEnvelope) -> Self {
        Self {
            summary: JobSummary::from(job),
            email_to: job.email_to.clone(),
            next_attempt_at: job.next_attempt_at,
            last_error: job.last_error.clone(),
            outcome: job.outcome.clone(),
            leased_by: job.lease.as_ref().map(|l| l.worker.to_string()),
        }
    }
}

/// Point-in-time view over the queue. Never mutates job state.
#[derive(Clone)]
pub struct QueueInspector {
    queue: Arc<dyn JobQueue>,
}

impl QueueInspector {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    pub fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobSummary>, QueueError> {
        let jobs = self.queue.list(status, limit)?;
        Ok(jobs.iter().map(JobSummary::from).collect())
    }

    pub fn detail(&self, job_id: JobId) -> Result<Option<JobDetail>, QueueError> {
        Ok(self.queue.get(job_id)?.as_ref().map(JobDetail::from))
    }

    pub fn dead_letters(&self, limit: usize) -> Result<Vec<JobDetail>, QueueError> {
        let jobs = self.queue.dead_letters(limit)?;
        Ok(jobs.iter().map(JobDetail::from).collect())
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        self.queue.stats()
    }
}
