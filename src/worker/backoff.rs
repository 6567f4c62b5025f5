//! Dispatcher wait policy

use std::time::Duration;

/// Why the dispatcher is about to wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Enabled flag is clear
    Disabled,
    /// Poll returned no task
    Idle,
    /// Poll failed at the transport level
    Error,
}

/// Wait intervals between polls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub idle: Duration,
    /// Idle wait once a wake trigger has been observed
    pub triggered_idle: Duration,
    pub error: Duration,
    pub disabled: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(5),
            triggered_idle: Duration::from_secs(300),
            error: Duration::from_secs(10),
            disabled: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Wait length for `reason`, given whether a trigger has been seen
    pub fn interval(&self, reason: WaitReason, trigger_seen: bool) -> Duration {
        match reason {
            WaitReason::Disabled => self.disabled,
            WaitReason::Error => self.error,
            WaitReason::Idle if trigger_seen => self.triggered_idle,
            WaitReason::Idle => self.idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_escalates_after_trigger() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.interval(WaitReason::Idle, false), Duration::from_secs(5));
        assert_eq!(policy.interval(WaitReason::Idle, true), Duration::from_secs(300));
    }

    #[test]
    fn test_error_and_disabled_ignore_trigger() {
        let policy = BackoffPolicy::default();
        for seen in [false, true] {
            assert_eq!(policy.interval(WaitReason::Error, seen), policy.error);
            assert_eq!(policy.interval(WaitReason::Disabled, seen), policy.disabled);
        }
    }
}
