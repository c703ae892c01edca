//! Shared progress and cancellation primitives
//!
//! Worker threads report progress through a shared atomic counter and poll a
//! shared cancellation flag once per row. Both are cheap enough to touch in
//! the inner loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonically increasing counter shared between worker threads and an
/// observer (for example a progress bar owned by the caller).
#[derive(Clone, Debug, Default)]
pub struct ProgressTracker {
    processed: Arc<AtomicU64>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` processed rows to the counter
    #[inline]
    pub fn add(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    /// Current number of processed rows
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

/// Cooperative cancellation flag.
///
/// Cancellation is one-way: once set it stays set. Workers check the flag
/// once per row and unwind with [`crate::Error::Cancelled`]; the coordinator
/// sets it when any worker fails so that its siblings stop promptly.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// True once [`cancel`](Self::cancel) has been called
    #[must_use]
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `Err(Error::Cancelled)` once cancellation was requested
    #[inline]
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
