//! In-memory queue for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::debug;

use reportworks_core::JobId;

use crate::envelope::{JobEnvelope, JobStatus};
use crate::queue::{
    apply_ack, AckDisposition, AckOutcome, EnqueueRequest, JobQueue, LeaseToken, LeasedJob,
    QueueConfig, QueueError, QueueStats, WorkerToken,
};

/// Non-durable queue backed by an `RwLock`'d map.
///
/// Same contract as the SQLite store; the write lock on the claim path gives
/// the mutual exclusion the lease contract requires.
#[derive(Debug)]
pub struct InMemoryQueue {
    config: QueueConfig,
    jobs: RwLock<HashMap<JobId, JobEnvelope>>,
}

impl InMemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl JobQueue for InMemoryQueue {
    fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, QueueError> {
        let job = JobEnvelope::new(request);
        let id = job.id;
        let mut jobs = self.jobs.write().map_err(|e| QueueError::Storage(e.to_string()))?;
        jobs.insert(id, job);
        debug!(job_id = %id, "enqueued job");
        Ok(id)
    }

    fn lease(&self, worker: &WorkerToken, max: usize) -> Result<Vec<LeasedJob>, QueueError> {
        let mut jobs = self.jobs.write().map_err(|e| QueueError::Storage(e.to_string()))?;
        let now = Utc::now();

        // Oldest-first over ready jobs (waiting past backoff, or expired
        // active leases being reclaimed).
        let mut ready: Vec<JobId> = jobs
            .values()
            .filter(|j| j.is_leasable(now))
            .map(|j| j.id)
            .collect();
        ready.sort_by_key(|id| jobs[id].created_at);
        ready.truncate(max);

        let mut leased = Vec::with_capacity(ready.len());
        for id in ready {
            if let Some(job) = jobs.get_mut(&id) {
                job.begin_lease(worker, self.config.lease_timeout_chrono(), now);
                leased.push(LeasedJob {
                    token: LeaseToken {
                        job_id: id,
                        generation: job.lease_generation(),
                    },
                    envelope: job.clone(),
                });
            }
        }
        Ok(leased)
    }

    fn ack(&self, token: &LeaseToken, outcome: AckOutcome) -> Result<AckDisposition, QueueError> {
        let mut jobs = self.jobs.write().map_err(|e| QueueError::Storage(e.to_string()))?;
        let job = jobs
            .get_mut(&token.job_id)
            .ok_or(QueueError::NotFound(token.job_id))?;
        apply_ack(job, token, outcome, &self.config, Utc::now())
    }

    fn update_progress(&self, token: &LeaseToken, percent: u8) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(|e| QueueError::Storage(e.to_string()))?;
        if let Some(job) = jobs.get_mut(&token.job_id) {
            // Advisory: ignore anything not coming from the live lease.
            if job.status == JobStatus::Active && job.lease_generation() == token.generation {
                job.raise_progress(percent, Utc::now());
            }
        }
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobEnvelope>, QueueError> {
        let jobs = self.jobs.read().map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobEnvelope>, QueueError> {
        let jobs = self.jobs.read().map_err(|e| QueueError::Storage(e.to_string()))?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        result.sort_by_key(|j| j.created_at);
        result.truncate(limit);
        Ok(result)
    }

    fn dead_letters(&self, limit: usize) -> Result<Vec<JobEnvelope>, QueueError> {
        self.list(Some(JobStatus::Failed), limit)
    }

    fn remove_waiting(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut jobs = self.jobs.write().map_err(|e| QueueError::Storage(e.to_string()))?;
        match jobs.get(&job_id) {
            None => Ok(false),
            Some(job) if job.status == JobStatus::Waiting => {
                jobs.remove(&job_id);
                Ok(true)
            }
            Some(_) => Err(QueueError::NotWaiting(job_id)),
        }
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        let jobs = self.jobs.read().map_err(|e| QueueError::Storage(e.to_string()))?;
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Waiting => stats.waiting += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::time::Duration;

    use super::*;
    use crate::policy::RetryPolicy;
    use reportworks_core::{ProductSalesFilters, ReportFilters, ReportType};

    fn request(name: &str) -> EnqueueRequest {
        EnqueueRequest {
            report_type: ReportType::ProductSales,
            filters: ReportFilters::ProductSales(ProductSalesFilters::default()),
            report_name: name.to_string(),
            email_to: "ops@example.com".to_string(),
        }
    }

    fn worker(n: usize) -> WorkerToken {
        WorkerToken::new(format!("worker-{n}"))
    }

    fn fast_retry_config(max_attempts: u32) -> QueueConfig {
        QueueConfig::default().with_retry(RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(10),
        ))
    }

    #[test]
    fn enqueue_then_lease_fifo() {
        let queue = InMemoryQueue::default();
        let first = queue.enqueue(request("first")).unwrap();
        let second = queue.enqueue(request("second")).unwrap();

        let leased = queue.lease(&worker(0), 1).unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].envelope.id, first);
        assert_eq!(leased[0].envelope.attempt, 1);

        let leased = queue.lease(&worker(0), 10).unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].envelope.id, second);

        assert!(queue.lease(&worker(0), 10).unwrap().is_empty());
    }

    #[test]
    fn concurrent_lease_calls_never_share_a_job() {
        let queue = Arc::new(InMemoryQueue::default());
        queue.enqueue(request("contended")).unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|n| {
                let queue = queue.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    queue.lease(&worker(n), 1).unwrap().len()
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1, "exactly one lease call wins the claim");
    }

    #[test]
    fn success_ack_completes_job() {
        let queue = InMemoryQueue::default();
        let id = queue.enqueue(request("ok")).unwrap();
        let leased = queue.lease(&worker(0), 1).unwrap().remove(0);

        let disposition = queue
            .ack(
                &leased.token,
                AckOutcome::Success {
                    rows: 7,
                    recipient: "ops@example.com".to_string(),
                },
            )
            .unwrap();
        assert_eq!(disposition, AckDisposition::Completed);

        let job = queue.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn retryable_failure_requeues_until_budget_exhausted() {
        let queue = InMemoryQueue::new(fast_retry_config(2));
        let id = queue.enqueue(request("flaky")).unwrap();

        let leased = queue.lease(&worker(0), 1).unwrap().remove(0);
        let disposition = queue
            .ack(
                &leased.token,
                AckOutcome::Failure {
                    reason: "smtp timeout".to_string(),
                    retryable: true,
                },
            )
            .unwrap();
        assert!(matches!(disposition, AckDisposition::Retrying { attempt: 1, .. }));

        // Wait out the backoff gate, then fail the second attempt too.
        std::thread::sleep(Duration::from_millis(5));
        let leased = queue.lease(&worker(1), 1).unwrap().remove(0);
        assert_eq!(leased.envelope.attempt, 2);
        let disposition = queue
            .ack(
                &leased.token,
                AckOutcome::Failure {
                    reason: "smtp timeout".to_string(),
                    retryable: true,
                },
            )
            .unwrap();
        assert_eq!(disposition, AckDisposition::Failed);

        let job = queue.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(queue.dead_letters(10).unwrap().len(), 1);
        assert!(queue.lease(&worker(0), 10).unwrap().is_empty());
    }

    #[test]
    fn permanent_failure_skips_retry_budget() {
        let queue = InMemoryQueue::new(fast_retry_config(5));
        let id = queue.enqueue(request("bad type")).unwrap();
        let leased = queue.lease(&worker(0), 1).unwrap().remove(0);

        let disposition = queue
            .ack(
                &leased.token,
                AckOutcome::Failure {
                    reason: "no builder registered".to_string(),
                    retryable: false,
                },
            )
            .unwrap();
        assert_eq!(disposition, AckDisposition::Failed);

        let job = queue.get(id).unwrap().unwrap();
        assert_eq!(job.attempt, 1, "no retry was attempted");
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn ack_on_terminal_job_is_a_noop() {
        let queue = InMemoryQueue::default();
        queue.enqueue(request("done twice")).unwrap();
        let leased = queue.lease(&worker(0), 1).unwrap().remove(0);

        let success = AckOutcome::Success {
            rows: 1,
            recipient: "ops@example.com".to_string(),
        };
        assert_eq!(
            queue.ack(&leased.token, success.clone()).unwrap(),
            AckDisposition::Completed
        );
        assert_eq!(
            queue.ack(&leased.token, success).unwrap(),
            AckDisposition::AlreadyTerminal
        );
    }

    #[test]
    fn stale_lease_ack_is_fenced() {
        let config = QueueConfig::default().with_lease_timeout(Duration::from_millis(1));
        let queue = InMemoryQueue::new(config);
        let id = queue.enqueue(request("stalled")).unwrap();

        let stale = queue.lease(&worker(0), 1).unwrap().remove(0);
        std::thread::sleep(Duration::from_millis(5));

        // Second worker reclaims the expired lease under a new generation.
        let fresh = queue.lease(&worker(1), 1).unwrap().remove(0);
        assert_eq!(fresh.envelope.id, id);
        assert_eq!(fresh.envelope.attempt, 2);
        assert_eq!(fresh.envelope.progress, 0);

        // The first worker's late ack must not override the new attempt.
        let err = queue
            .ack(
                &stale.token,
                AckOutcome::Failure {
                    reason: "late".to_string(),
                    retryable: true,
                },
            )
            .unwrap_err();
        assert!(matches!(err, QueueError::StaleLease { .. }));

        let disposition = queue
            .ack(
                &fresh.token,
                AckOutcome::Success {
                    rows: 2,
                    recipient: "ops@example.com".to_string(),
                },
            )
            .unwrap();
        assert_eq!(disposition, AckDisposition::Completed);
    }

    #[test]
    fn stale_progress_updates_are_ignored() {
        let config = QueueConfig::default().with_lease_timeout(Duration::from_millis(1));
        let queue = InMemoryQueue::new(config);
        let id = queue.enqueue(request("stalled")).unwrap();

        let stale = queue.lease(&worker(0), 1).unwrap().remove(0);
        std::thread::sleep(Duration::from_millis(5));
        let fresh = queue.lease(&worker(1), 1).unwrap().remove(0);

        queue.update_progress(&stale.token, 90).unwrap();
        assert_eq!(queue.get(id).unwrap().unwrap().progress, 0);

        queue.update_progress(&fresh.token, 20).unwrap();
        assert_eq!(queue.get(id).unwrap().unwrap().progress, 20);
    }

    #[test]
    fn remove_waiting_only_before_lease() {
        let queue = InMemoryQueue::default();
        let id = queue.enqueue(request("unwanted")).unwrap();
        assert!(queue.remove_waiting(id).unwrap());
        assert!(queue.get(id).unwrap().is_none());
        assert!(!queue.remove_waiting(id).unwrap());

        let id = queue.enqueue(request("already running")).unwrap();
        queue.lease(&worker(0), 1).unwrap();
        assert!(matches!(
            queue.remove_waiting(id),
            Err(QueueError::NotWaiting(_))
        ));
    }

    #[test]
    fn stats_count_by_status() {
        let queue = InMemoryQueue::default();
        for n in 0..3 {
            queue.enqueue(request(&format!("job {n}"))).unwrap();
        }
        let leased = queue.lease(&worker(0), 1).unwrap().remove(0);
        queue
            .ack(
                &leased.token,
                AckOutcome::Success {
                    rows: 1,
                    recipient: "ops@example.com".to_string(),
                },
            )
            .unwrap();
        queue.lease(&worker(0), 1).unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(
            stats,
            QueueStats {
                waiting: 1,
                active: 1,
                completed: 1,
                failed: 0,
            }
        );
    }
}
