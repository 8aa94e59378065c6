//! End-to-end pipeline tests: enqueue, lease, build, deliver, ack, observe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use reportworks_core::{ProductSalesFilters, ReportFilters, ReportType};
use reportworks_delivery::{DeliveryReceipt, Mailer, MailerError, ReportMail};
use reportworks_queue::{
    EnqueueRequest, InMemoryQueue, JobQueue, JobStatus, QueueConfig, RetryPolicy,
};
use reportworks_reports::{
    BatchAllocation, BuilderRegistry, InMemorySalesRepository, ProductSalesBuilder, SaleRow,
};
use reportworks_worker::{
    InMemoryJobEventBus, JobEvent, JobEventBus, QueueInspector, Subscription, WorkerPool,
    WorkerPoolConfig,
};

/// Mailer double: records every handed-off mail, optionally failing the
/// first N sends with a transport fault.
#[derive(Default)]
struct FakeMailer {
    sent: Mutex<Vec<ReportMail>>,
    fail_first: AtomicUsize,
}

impl FakeMailer {
    fn failing_first(n: usize) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(n),
        }
    }

    fn sent(&self) -> Vec<ReportMail> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for FakeMailer {
    fn send(&self, mail: &ReportMail) -> Result<DeliveryReceipt, MailerError> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .fail_first
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(MailerError::Transport("relay connection reset".into()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(DeliveryReceipt {
            provider_response: Some("250 Ok".into()),
        })
    }
}

struct Pipeline {
    queue: Arc<InMemoryQueue>,
    repository: Arc<InMemorySalesRepository>,
    mailer: Arc<FakeMailer>,
    events: Arc<InMemoryJobEventBus>,
}

impl Pipeline {
    fn new(mailer: FakeMailer) -> Self {
        let config = QueueConfig::default()
            .with_lease_timeout(Duration::from_secs(30))
            .with_retry(RetryPolicy::new(
                3,
                Duration::from_millis(5),
                Duration::from_millis(50),
            ));
        Self {
            queue: InMemoryQueue::arc(config),
            repository: Arc::new(InMemorySalesRepository::default()),
            mailer: Arc::new(mailer),
            events: Arc::new(InMemoryJobEventBus::new()),
        }
    }

    fn start(&self, workers: usize) -> reportworks_worker::PoolHandle {
        reportworks_observability::init();
        let registry = Arc::new(
            BuilderRegistry::new()
                .register(Arc::new(ProductSalesBuilder::new(self.repository.clone()))),
        );
        let config = WorkerPoolConfig::default()
            .with_workers(workers)
            .with_poll_interval(Duration::from_millis(5));
        WorkerPool::new(
            self.queue.clone(),
            registry,
            self.mailer.clone(),
            self.events.clone(),
            config,
        )
        .start()
    }

    fn enqueue(&self, report_type: ReportType, filters: ProductSalesFilters) -> reportworks_core::JobId {
        self.queue
            .enqueue(EnqueueRequest {
                report_type,
                filters: ReportFilters::ProductSales(filters),
                report_name: "Vendor Sales".to_string(),
                email_to: "ops@example.com".to_string(),
            })
            .unwrap()
    }
}

fn seed_rows(repository: &InMemorySalesRepository, vendor_id: Uuid, count: usize) {
    for n in 0..count {
        repository.push(SaleRow {
            vendor_id,
            order_ref: format!("ORD-{n:03}"),
            order_status: 1,
            quantity: 2,
            unit_price: 50.0,
            batches: vec![BatchAllocation {
                batch_no: "B1".to_string(),
                cost_price: 30.0,
                quantity: 2,
            }],
            created_at: Utc::now(),
        });
    }
}

/// Wait for the terminal event of one job, collecting its whole event trail.
fn await_terminal(sub: &Subscription, job_id: reportworks_core::JobId) -> Vec<JobEvent> {
    let mut trail = Vec::new();
    loop {
        let event = sub
            .recv_timeout(Duration::from_secs(5))
            .expect("timed out waiting for a terminal job event");
        if event.job_id() != job_id {
            continue;
        }
        let terminal = event.is_terminal();
        trail.push(event);
        if terminal {
            return trail;
        }
    }
}

#[test]
fn happy_path_builds_mails_and_completes() {
    let pipeline = Pipeline::new(FakeMailer::default());
    let vendor = Uuid::now_v7();
    seed_rows(&pipeline.repository, vendor, 3);

    let sub = pipeline.events.subscribe();
    let handle = pipeline.start(2);
    let job_id = pipeline.enqueue(
        ReportType::ProductSales,
        ProductSalesFilters {
            vendor_id: Some(vendor),
            ..Default::default()
        },
    );

    let trail = await_terminal(&sub, job_id);
    handle.shutdown();

    assert!(matches!(
        trail.first(),
        Some(JobEvent::Leased { attempt: 1, .. })
    ));
    match trail.last() {
        Some(JobEvent::Completed {
            rows, recipient, ..
        }) => {
            assert_eq!(*rows, 3);
            assert_eq!(recipient, "ops@example.com");
        }
        other => panic!("expected a completed event, got {other:?}"),
    }

    // Progress checkpoints arrive in order and end at 100.
    let checkpoints: Vec<u8> = trail
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(checkpoints, vec![10, 20, 80, 100]);

    let sent = pipeline.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ops@example.com");
    assert!(sent[0].attachment_name.starts_with("Vendor-Sales-"));
    assert!(sent[0].attachment.starts_with(b"PK"));

    let job = pipeline.queue.get(job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.attempt, 1);
}

#[test]
fn empty_result_fails_permanently_on_the_first_attempt() {
    let pipeline = Pipeline::new(FakeMailer::default());
    // No rows seeded: the filters match nothing.
    let sub = pipeline.events.subscribe();
    let handle = pipeline.start(1);
    let job_id = pipeline.enqueue(ReportType::ProductSales, ProductSalesFilters::default());

    let trail = await_terminal(&sub, job_id);
    handle.shutdown();

    match trail.last() {
        Some(JobEvent::Failed {
            attempt, reason, ..
        }) => {
            assert_eq!(*attempt, 1, "no data must not burn the retry budget");
            assert!(reason.contains("no data"), "unexpected reason: {reason}");
        }
        other => panic!("expected a failed event, got {other:?}"),
    }
    assert!(pipeline.mailer.sent().is_empty());

    let inspector = QueueInspector::new(pipeline.queue.clone());
    let dead = inspector.dead_letters(10).unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].summary.id, job_id);
}

#[test]
fn transient_mailer_fault_retries_then_completes() {
    let pipeline = Pipeline::new(FakeMailer::failing_first(1));
    let vendor = Uuid::now_v7();
    seed_rows(&pipeline.repository, vendor, 1);

    let sub = pipeline.events.subscribe();
    let handle = pipeline.start(1);
    let job_id = pipeline.enqueue(
        ReportType::ProductSales,
        ProductSalesFilters {
            vendor_id: Some(vendor),
            ..Default::default()
        },
    );

    let trail = await_terminal(&sub, job_id);
    handle.shutdown();

    let retried = trail
        .iter()
        .any(|e| matches!(e, JobEvent::Retrying { attempt: 1, .. }));
    assert!(retried, "first attempt should have been acked retryable");
    assert!(matches!(trail.last(), Some(JobEvent::Completed { .. })));

    let job = pipeline.queue.get(job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempt, 2);
    assert_eq!(pipeline.mailer.sent().len(), 1);
}

#[test]
fn unregistered_report_type_is_a_permanent_failure() {
    let pipeline = Pipeline::new(FakeMailer::default());
    let sub = pipeline.events.subscribe();
    let handle = pipeline.start(1);
    // The registry only knows product sales.
    let job_id = pipeline.enqueue(ReportType::Inventory, ProductSalesFilters::default());

    let trail = await_terminal(&sub, job_id);
    handle.shutdown();

    match trail.last() {
        Some(JobEvent::Failed {
            attempt, reason, ..
        }) => {
            assert_eq!(*attempt, 1);
            assert!(reason.contains("no builder"), "unexpected reason: {reason}");
        }
        other => panic!("expected a failed event, got {other:?}"),
    }
}

#[test]
fn shutdown_stops_idle_workers_promptly() {
    let pipeline = Pipeline::new(FakeMailer::default());
    let handle = pipeline.start(3);
    std::thread::sleep(Duration::from_millis(20));
    handle.shutdown();
    // Nothing was enqueued; shutdown returning is the assertion.
    assert_eq!(pipeline.queue.stats().unwrap().waiting, 0);
}
