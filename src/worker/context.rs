//! State shared between the dispatcher, the registration synchronizer and
//! the control front end
//!
//! The front end only flips the enabled flag and fires the wake trigger;
//! the dispatcher reads both on every loop iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Woken,
}

/// Early wake-up signal for the idle wait
///
/// A fire while nobody is waiting is kept and ends the next wait at once.
/// Firing also marks the trigger as seen until the backoff is reset.
#[derive(Debug, Default)]
pub struct WakeTrigger {
    notify: Notify,
    seen: AtomicBool,
}

impl WakeTrigger {
    pub fn fire(&self) {
        self.seen.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether a trigger has fired since the last reset
    pub fn seen(&self) -> bool {
        self.seen.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.seen.store(false, Ordering::SeqCst);
    }

    /// Sleep for `timeout` or until fired, whichever comes first
    pub async fn wait(&self, timeout: Duration) -> WaitOutcome {
        tokio::select! {
            _ = self.notify.notified() => WaitOutcome::Woken,
            _ = tokio::time::sleep(timeout) => WaitOutcome::Elapsed,
        }
    }
}

/// Explicit context object handed to the worker components
#[derive(Debug, Default)]
pub struct WorkerContext {
    enabled: AtomicBool,
    enabled_changed: Notify,
    trigger: WakeTrigger,
}

impl WorkerContext {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Set the enabled flag, returning the previous value
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            self.enabled_changed.notify_one();
        }
        previous
    }

    pub fn trigger(&self) -> &WakeTrigger {
        &self.trigger
    }

    pub fn fire_trigger(&self) {
        self.trigger.fire();
    }

    /// Return idle waits to the short interval
    pub fn reset_backoff(&self) {
        self.trigger.reset();
    }

    /// Sleep for `timeout` or until the enabled flag changes
    pub async fn wait_for_enabled(&self, timeout: Duration) -> WaitOutcome {
        if self.is_enabled() {
            return WaitOutcome::Woken;
        }
        tokio::select! {
            _ = self.enabled_changed.notified() => WaitOutcome::Woken,
            _ = tokio::time::sleep(timeout) => WaitOutcome::Elapsed,
        }
    }
}
