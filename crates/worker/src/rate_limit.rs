//! Sliding-window admission gate for job starts.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Start-rate cap: at most `max_starts` within any rolling `window`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_starts: usize,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_starts: 10,
            window: Duration::from_secs(1),
        }
    }
}

/// Shared admission gate: counts job starts in a rolling window.
///
/// Gates admission to *start* only; in-flight concurrency is bounded by the
/// pool size. Callers that would exceed the window get the wait until the
/// oldest start leaves it — work is deferred, never dropped.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: RateLimit,
    starts: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            starts: Mutex::new(VecDeque::with_capacity(limit.max_starts)),
        }
    }

    /// Record a start, or return how long to wait before the window has room.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut starts = match self.starts.lock() {
            Ok(guard) => guard,
            // A poisoned counter must not wedge the pool; admit.
            Err(poisoned) => poisoned.into_inner(),
        };

        while let Some(front) = starts.front() {
            if now.duration_since(*front) >= self.limit.window {
                starts.pop_front();
            } else {
                break;
            }
        }

        if starts.len() < self.limit.max_starts {
            starts.push_back(now);
            Ok(())
        } else {
            let oldest = starts[0];
            Err(self.limit.window.saturating_sub(now.duration_since(oldest)))
        }
    }

    /// Return an admission that did not lead to a start (e.g. the queue was
    /// empty), so an idle poll never consumes window capacity.
    pub fn release(&self) {
        let mut starts = match self.starts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        starts.pop_back();
    }
}
