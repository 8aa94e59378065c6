//! `reportworks-queue` — durable job queue for the report pipeline.
//!
//! ## Design
//!
//! - Jobs are immutable envelopes plus queue-owned progress/attempt state
//! - Lease-based dequeue: a time-bounded, exclusive, generation-fenced claim
//! - Retry with exponential backoff, permanent failures land in a
//!   dead-letter view
//! - Two implementations behind one trait: in-memory (tests/dev) and
//!   SQLite-backed (survives restarts)
//!
//! ## Components
//!
//! - `JobEnvelope`: the queued unit of work and its lifecycle state
//! - `JobQueue`: the queue contract (enqueue / lease / ack / inspect)
//! - `RetryPolicy`: backoff schedule for retryable failures
//! - `InMemoryQueue` / `SqliteQueue`: the two stores

pub mod envelope;
pub mod memory;
pub mod policy;
pub mod queue;
pub mod sqlite;

pub use envelope::{JobEnvelope, JobOutcome, JobStatus, LeaseInfo};
pub use memory::InMemoryQueue;
pub use policy::RetryPolicy;
pub use queue::{
    AckDisposition, AckOutcome, EnqueueRequest, JobQueue, LeaseToken, LeasedJob, QueueConfig,
    QueueError, QueueStats, WorkerToken,
};
pub use sqlite::SqliteQueue;
