//! Per-job event broadcast.
//!
//! The pool publishes progress and terminal events here; the operator console
//! (or anything else) subscribes. Best-effort fan-out: dead subscribers are
//! dropped, and losing an event never affects job correctness — the queue is
//! the source of truth.

use std::sync::{mpsc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use reportworks_core::JobId;

/// Something observable happened to one job.
///
/// Events for a single job are published in order (lease, progress, terminal);
/// there is no ordering across jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Leased {
        job_id: JobId,
        attempt: u32,
        worker: String,
    },
    Progress {
        job_id: JobId,
        percent: u8,
    },
    Completed {
        job_id: JobId,
        rows: usize,
        recipient: String,
    },
    /// Retryable failure; the job is back in the queue.
    Retrying {
        job_id: JobId,
        attempt: u32,
        reason: String,
        next_attempt_at: DateTime<Utc>,
    },
    /// Permanent failure.
    Failed {
        job_id: JobId,
        attempt: u32,
        reason: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Leased { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Retrying { job_id, .. }
            | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

/// A subscription to the job event stream (broadcast semantics).
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<JobEvent>,
}

impl Subscription {
    /// Block until the next event is available.
    pub fn recv(&self) -> Result<JobEvent, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Result<JobEvent, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for an event.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<JobEvent, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Publisher side of the job event stream.
pub trait JobEventBus: Send + Sync {
    fn publish(&self, event: JobEvent);
    fn subscribe(&self) -> Subscription;
}

/// In-process pub/sub over std channels.
#[derive(Debug, Default)]
pub struct InMemoryJobEventBus {
    subscribers: Mutex<Vec<mpsc::Sender<JobEvent>>>,
}

impl InMemoryJobEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobEventBus for InMemoryJobEventBus {
    fn publish(&self, event: JobEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            // Drop any dead subscribers while publishing.
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        Subscription { receiver: rx }
    }
}
