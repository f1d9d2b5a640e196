//! Runtime flags an operator can flip while the scheduler is running.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared runtime knobs, read by the scheduler on every tick.
///
/// These take precedence over cooldown and rate limits for non-interval
/// triggers: a `success` history blocks re-queueing unless
/// `retry_success` is on, and a `failed` history blocks it when
/// `retry_failed` is off.
#[derive(Debug)]
pub struct RuntimeConfig {
    retry_success: AtomicBool,
    retry_failed: AtomicBool,
    use_studio_actions: AtomicBool,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self {
            retry_success: AtomicBool::new(false),
            retry_failed: AtomicBool::new(true),
            use_studio_actions: AtomicBool::new(false),
        }
    }

    /// Re-queue actions whose most recent terminal status is `success`.
    /// Default off.
    pub fn retry_success(&self) -> bool {
        self.retry_success.load(Ordering::Relaxed)
    }

    pub fn set_retry_success(&self, v: bool) {
        self.retry_success.store(v, Ordering::Relaxed);
    }

    /// Allow the maintainer to re-queue failed entries with backoff.
    /// Default on.
    pub fn retry_failed(&self) -> bool {
        self.retry_failed.load(Ordering::Relaxed)
    }

    pub fn set_retry_failed(&self, v: bool) {
        self.retry_failed.store(v, Ordering::Relaxed);
    }

    /// Load definitions from the studio source instead of the catalog.
    pub fn use_studio_actions(&self) -> bool {
        self.use_studio_actions.load(Ordering::Relaxed)
    }

    pub fn set_use_studio_actions(&self, v: bool) {
        self.use_studio_actions.store(v, Ordering::Relaxed);
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}
