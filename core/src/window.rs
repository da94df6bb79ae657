//! Rolling metrics windows for circuit breaker outcomes
//!
//! This module provides different window implementations:
//! - `RollingWindow`: Thread-safe bucketed window summing the most recent buckets
//! - `NullWindow`: No-op window for testing and benchmarking

use crate::Outcome;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Instant;

/// Read-only view of a window's current contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_count: u64,
    pub failure_count: u64,
    /// `failure_count / total_count * 100`, or 0.0 for an empty window
    pub error_percentage: f64,
}

impl MetricsSnapshot {
    pub fn new(success_count: u64, failure_count: u64) -> Self {
        let total_count = success_count + failure_count;
        let error_percentage = if total_count > 0 {
            failure_count as f64 / total_count as f64 * 100.0
        } else {
            0.0
        };

        Self {
            total_count,
            failure_count,
            error_percentage,
        }
    }

    pub fn success_count(&self) -> u64 {
        self.total_count - self.failure_count
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

/// Abstract outcome window for a single command
pub trait MetricsWindow: Send + Sync + std::fmt::Debug {
    /// Append an outcome stamped with the current time
    fn record(&self, outcome: Outcome);

    /// Counts over the outcomes still inside the time horizon
    fn snapshot(&self) -> MetricsSnapshot;

    /// Drop every recorded outcome
    fn clear(&self);

    /// Monotonic time in milliseconds (relative to window creation)
    fn monotonic_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// `now / bucket_ms` at the time this bucket was (re)started
    epoch: u64,
    successes: u64,
    failures: u64,
}

/// Bucketed rolling window
///
/// The horizon is split into `buckets` slots of `window_ms / buckets` each, kept
/// in a ring indexed by epoch. A slot whose epoch has fallen out of the horizon
/// is zeroed lazily, on the next record or snapshot that touches it.
#[derive(Debug)]
pub struct RollingWindow {
    buckets: Mutex<Vec<Bucket>>,
    bucket_ms: u64,
    /// Monotonic time anchor (prevents clock skew issues from NTP)
    start_time: Instant,
}

impl RollingWindow {
    /// Create a window of 10 one-second buckets
    pub fn new() -> Self {
        Self::with_geometry(10_000, 10)
    }

    /// Create a window spanning `window_ms`, split into `buckets` slots
    ///
    /// # Panics
    ///
    /// Panics if `buckets` is 0 or `window_ms` is smaller than `buckets`.
    pub fn with_geometry(window_ms: u64, buckets: u32) -> Self {
        assert!(buckets > 0, "Rolling window needs at least one bucket");
        let bucket_ms = window_ms / buckets as u64;
        assert!(bucket_ms > 0, "Rolling window buckets must span at least 1 ms");

        Self {
            buckets: Mutex::new(vec![Bucket::default(); buckets as usize]),
            bucket_ms,
            start_time: Instant::now(),
        }
    }

    /// Total time horizon covered by the window
    pub fn window_ms(&self) -> u64 {
        self.bucket_ms * self.bucket_count() as u64
    }

    pub fn bucket_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Bucket>> {
        self.buckets
            .lock()
            .expect("rolling window lock poisoned; outcome counts are unreliable")
    }

    fn current_epoch(&self) -> u64 {
        // Epoch 0 is reserved for never-written buckets
        self.monotonic_millis() / self.bucket_ms + 1
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsWindow for RollingWindow {
    fn record(&self, outcome: Outcome) {
        let epoch = self.current_epoch();
        let mut buckets = self.lock();
        let len = buckets.len() as u64;
        let bucket = &mut buckets[(epoch % len) as usize];

        if bucket.epoch > epoch {
            // Slot already reused by a newer epoch; this outcome is past the horizon
            return;
        }
        if bucket.epoch < epoch {
            *bucket = Bucket {
                epoch,
                ..Bucket::default()
            };
        }

        match outcome {
            Outcome::Success => bucket.successes += 1,
            Outcome::Failure => bucket.failures += 1,
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let epoch = self.current_epoch();
        let mut buckets = self.lock();
        let len = buckets.len() as u64;

        let mut successes = 0;
        let mut failures = 0;
        for bucket in buckets.iter_mut() {
            if bucket.epoch == 0 {
                continue;
            }
            if epoch.saturating_sub(bucket.epoch) >= len {
                // Evict
                *bucket = Bucket::default();
                continue;
            }
            successes += bucket.successes;
            failures += bucket.failures;
        }

        MetricsSnapshot::new(successes, failures)
    }

    fn clear(&self) {
        let mut buckets = self.lock();
        buckets.iter_mut().for_each(|b| *b = Bucket::default());
    }

    fn monotonic_millis(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}

/// No-op window for testing and benchmarking
///
/// Discards every outcome and always reports an empty snapshot, so a breaker
/// using it never opens on its own.
///
/// # Example
///
/// ```rust
/// use command_breaker::{CircuitBreaker, NullWindow};
/// use std::sync::Arc;
///
/// let breaker = CircuitBreaker::builder("test")
///     .window(Arc::new(NullWindow::new()))
///     .build();
/// assert!(breaker.is_closed());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct NullWindow {
    start_time: Instant,
}

impl NullWindow {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for NullWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsWindow for NullWindow {
    fn record(&self, _outcome: Outcome) {}

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }

    fn clear(&self) {}

    fn monotonic_millis(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}
