//! `reportworks-worker` — the worker pool and its observation surfaces.
//!
//! ## Components
//!
//! - `WorkerPool`: N threads leasing from a shared queue, dispatching to
//!   report builders and acking outcomes
//! - `SlidingWindowLimiter`: caps job starts per rolling window across the
//!   whole pool
//! - `JobEventBus`: broadcast of per-job progress and terminal events
//! - `QueueInspector`: read-only projection for the operator console

pub mod events;
pub mod inspect;
pub mod pool;
pub mod rate_limit;

pub use events::{InMemoryJobEventBus, JobEvent, JobEventBus, Subscription};
pub use inspect::{JobDetail, JobSummary, QueueInspector};
pub use pool::{PoolHandle, WorkerPool, WorkerPoolConfig};
pub use rate_limit::{RateLimit, SlidingWindowLimiter};
