//! Progress signalling and job statistics
//!
//! Every terminal target transition fires a best-effort signal toward the
//! request-status reporter. Absence of a listener is legal; the engine never
//! waits on one.

use std::sync::atomic::{AtomicU64, Ordering};

/// Fire-and-forget notification consumed by request-status reporting
pub trait ProgressSignal: Send + Sync {
    /// Signal that some target changed state
    fn signal(&self);
}

/// Listener that drops every signal
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSignal for NoProgress {
    fn signal(&self) {}
}

/// Counters collected while a job runs
///
/// Readable from the job handle at any time; all counters are monotonic.
#[derive(Debug, Default)]
pub struct JobStats {
    /// Targets discovered during expansion (excludes root and initial)
    pub discovered: AtomicU64,

    /// Directory listings performed
    pub listings: AtomicU64,

    /// Targets that reached COMPLETED
    pub completed: AtomicU64,

    /// Targets that reached FAILED
    pub failed: AtomicU64,

    /// Targets that reached SKIPPED
    pub skipped: AtomicU64,

    /// Targets that reached CANCELLED
    pub cancelled: AtomicU64,

    /// Retry resubmissions
    pub retries: AtomicU64,
}

impl JobStats {
    /// Record a discovered target
    pub fn record_discovered(&self) {
        self.discovered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a directory listing
    pub fn record_listing(&self) {
        self.listings.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completion
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failure
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a skip
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cancellation
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry resubmission
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Total targets that reached a terminal state
    pub fn terminal(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.skipped.load(Ordering::Relaxed)
            + self.cancelled.load(Ordering::Relaxed)
    }
}
