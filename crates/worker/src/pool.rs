//! The worker pool: leases jobs, builds reports, delivers them, acks
//! outcomes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use reportworks_delivery::{compose_report_mail, Mailer, MailerError};
use reportworks_queue::{
    AckDisposition, AckOutcome, JobQueue, LeaseToken, LeasedJob, QueueError, WorkerToken,
};
use reportworks_reports::{BuildError, BuilderRegistry, RepositoryError};

use crate::events::{JobEvent, JobEventBus};
use crate::rate_limit::{RateLimit, SlidingWindowLimiter};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads (bounded concurrency).
    pub workers: usize,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Cap on job starts across the whole pool.
    pub rate: RateLimit,
    /// When set, an empty result set is acked retryable instead of permanent.
    pub retry_empty_reports: bool,
    /// Thread-name prefix, also the lease holder identity.
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            poll_interval: Duration::from_millis(100),
            rate: RateLimit::default(),
            retry_empty_reports: false,
            name: "report-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_rate(mut self, rate: RateLimit) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_retry_empty_reports(mut self, retry: bool) -> Self {
        self.retry_empty_reports = retry;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Handle to stop a running pool.
#[derive(Debug)]
pub struct PoolHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
}

impl PoolHandle {
    /// Request graceful shutdown and wait for all workers to stop.
    ///
    /// In-flight jobs run to their ack; only the polling loops stop.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
    }
}

/// Everything a worker thread needs, shared across the pool.
struct PoolShared {
    queue: Arc<dyn JobQueue>,
    registry: Arc<BuilderRegistry>,
    mailer: Arc<dyn Mailer>,
    events: Arc<dyn JobEventBus>,
    limiter: SlidingWindowLimiter,
    config: WorkerPoolConfig,
}

/// Fixed-size pool of report workers over one shared queue.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        registry: Arc<BuilderRegistry>,
        mailer: Arc<dyn Mailer>,
        events: Arc<dyn JobEventBus>,
        config: WorkerPoolConfig,
    ) -> Self {
        let limiter = SlidingWindowLimiter::new(config.rate);
        Self {
            shared: Arc::new(PoolShared {
                queue,
                registry,
                mailer,
                events,
                limiter,
                config,
            }),
        }
    }

    /// Spawn the worker threads.
    pub fn start(self) -> PoolHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut joins = Vec::with_capacity(self.shared.config.workers);

        for n in 0..self.shared.config.workers {
            let shared = self.shared.clone();
            let shutdown = shutdown.clone();
            let name = format!("{}-{n}", shared.config.name);
            let token = WorkerToken::new(name.clone());

            let join = thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(shared, token, shutdown))
                .expect("failed to spawn report worker thread");
            joins.push(join);
        }

        info!(workers = self.shared.config.workers, "worker pool started");
        PoolHandle { shutdown, joins }
    }
}

fn worker_loop(shared: Arc<PoolShared>, token: WorkerToken, shutdown: Arc<AtomicBool>) {
    debug!(worker = %token, "worker started");

    while !shutdown.load(Ordering::Relaxed) {
        // Admission gate first: starts are capped per window, the work is
        // deferred rather than dropped.
        if let Err(wait) = shared.limiter.try_acquire() {
            thread::sleep(wait.min(shared.config.poll_interval));
            continue;
        }

        let leased = match shared.queue.lease(&token, 1) {
            Ok(leased) => leased,
            Err(err) => {
                error!(worker = %token, error = %err, "failed to lease");
                shared.limiter.release();
                thread::sleep(shared.config.poll_interval);
                continue;
            }
        };

        let Some(job) = leased.into_iter().next() else {
            // Nothing to start; the admission goes back to the window.
            shared.limiter.release();
            thread::sleep(shared.config.poll_interval);
            continue;
        };

        process(&shared, &token, job);
    }

    debug!(worker = %token, "worker stopped");
}

fn process(shared: &PoolShared, worker: &WorkerToken, job: LeasedJob) {
    let LeasedJob { envelope, token } = job;
    let job_id = envelope.id;

    shared.events.publish(JobEvent::Leased {
        job_id,
        attempt: envelope.attempt,
        worker: worker.to_string(),
    });
    report_progress(shared, &token, 10);

    let outcome = execute(shared, &token, &envelope);
    match shared.queue.ack(&token, outcome.clone()) {
        Ok(AckDisposition::Completed) => {
            if let AckOutcome::Success { rows, recipient } = outcome {
                info!(job_id = %job_id, rows, "job completed");
                shared.events.publish(JobEvent::Completed {
                    job_id,
                    rows,
                    recipient,
                });
            }
        }
        Ok(AckDisposition::Retrying {
            attempt,
            next_attempt_at,
        }) => {
            if let AckOutcome::Failure { reason, .. } = outcome {
                warn!(job_id = %job_id, attempt, reason = %reason, "job will retry");
                shared.events.publish(JobEvent::Retrying {
                    job_id,
                    attempt,
                    reason,
                    next_attempt_at,
                });
            }
        }
        Ok(AckDisposition::Failed) => {
            if let AckOutcome::Failure { reason, .. } = outcome {
                warn!(job_id = %job_id, reason = %reason, "job failed permanently");
                shared.events.publish(JobEvent::Failed {
                    job_id,
                    attempt: envelope.attempt,
                    reason,
                });
            }
        }
        Ok(AckDisposition::AlreadyTerminal) => {
            debug!(job_id = %job_id, "ack on already-terminal job ignored");
        }
        Err(QueueError::StaleLease { held, current, .. }) => {
            // Our lease was superseded while we worked; the newer attempt
            // owns the outcome now.
            warn!(job_id = %job_id, held, current, "outcome discarded, lease superseded");
        }
        Err(err) => {
            error!(job_id = %job_id, error = %err, "failed to ack job");
        }
    }
}

/// Run one leased job to an outcome. Never panics on expected failures;
/// every error ends up in the ack reason.
fn execute(
    shared: &PoolShared,
    token: &LeaseToken,
    envelope: &reportworks_queue::JobEnvelope,
) -> AckOutcome {
    let Some(builder) = shared.registry.get(envelope.report_type) else {
        return AckOutcome::Failure {
            reason: format!(
                "no builder registered for report type {}",
                envelope.report_type
            ),
            retryable: false,
        };
    };

    let mut progress = |percent: u8| report_progress(shared, token, percent);
    let report = match builder.build(&envelope.filters, &mut progress) {
        Ok(report) => report,
        Err(err) => {
            return AckOutcome::Failure {
                retryable: build_error_retryable(&err, &shared.config),
                reason: err.to_string(),
            };
        }
    };

    let mail = compose_report_mail(envelope, &report);
    match shared.mailer.send(&mail) {
        Ok(receipt) => {
            debug!(job_id = %envelope.id, response = ?receipt.provider_response, "mail handed off");
            report_progress(shared, token, 100);
            AckOutcome::Success {
                rows: report.rows,
                recipient: envelope.email_to.clone(),
            }
        }
        Err(err) => AckOutcome::Failure {
            retryable: mailer_error_retryable(&err),
            reason: err.to_string(),
        },
    }
}

fn report_progress(shared: &PoolShared, token: &LeaseToken, percent: u8) {
    // Advisory: a lost update must never fail the job.
    if let Err(err) = shared.queue.update_progress(token, percent) {
        debug!(job_id = %token.job_id, error = %err, "progress update dropped");
        return;
    }
    shared.events.publish(JobEvent::Progress {
        job_id: token.job_id,
        percent,
    });
}

fn build_error_retryable(err: &BuildError, config: &WorkerPoolConfig) -> bool {
    match err {
        // Empty result is a user-input condition, permanent unless the
        // operator opted into retrying it.
        BuildError::NoData => config.retry_empty_reports,
        BuildError::FilterMismatch { .. } => false,
        BuildError::Repository(RepositoryError::InvalidFilters(_)) => false,
        BuildError::Repository(RepositoryError::Unavailable(_)) => true,
        // Serialization faults are resource exhaustion more often than bad
        // input.
        BuildError::Render(_) => true,
    }
}

fn mailer_error_retryable(err: &MailerError) -> bool {
    err.is_transient()
}
