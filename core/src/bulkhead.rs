//! Concurrency limiting for guarded commands
//!
//! A lock-free counter caps how many executions of one command may be in
//! flight. The cap is passed on every acquire so it follows the breaker's
//! current (hot-swappable) configuration.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts in-flight executions of a command
#[derive(Debug, Default)]
pub struct Bulkhead {
    in_flight: AtomicUsize,
}

impl Bulkhead {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take a slot without blocking
    ///
    /// Returns `None` when `limit` executions are already in flight.
    pub fn try_acquire(self: &Arc<Self>, limit: usize) -> Option<BulkheadPermit> {
        let mut current = self.in_flight.load(Ordering::Acquire);

        loop {
            if current >= limit {
                return None;
            }

            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(BulkheadPermit {
                        bulkhead: Arc::clone(self),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::Release);
    }
}

/// Slot in a [`Bulkhead`], released when dropped (including during a panic)
#[derive(Debug)]
pub struct BulkheadPermit {
    bulkhead: Arc<Bulkhead>,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.bulkhead.release();
    }
}
