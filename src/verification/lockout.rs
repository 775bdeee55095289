//! Failed-attempt tracking with exponential lockout.
//!
//! Once `failed_attempts` reaches the threshold the tracker locks for
//! `min(2^(failed_attempts - threshold) * base, max)` seconds. The lockout
//! counts down one second per [`AttemptTracker::tick_lockout`] and, when it
//! elapses, the failure count starts over from zero.

use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

pub const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
pub const DEFAULT_LOCKOUT_BASE_SECONDS: u64 = 30;
pub const DEFAULT_LOCKOUT_MAX_SECONDS: u64 = 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    threshold: u32,
    base_seconds: u64,
    max_seconds: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            base_seconds: DEFAULT_LOCKOUT_BASE_SECONDS,
            max_seconds: DEFAULT_LOCKOUT_MAX_SECONDS,
        }
    }
}

impl LockoutPolicy {
    #[must_use]
    pub fn new(threshold: u32, base_seconds: u64, max_seconds: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            base_seconds,
            max_seconds,
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Lockout length for a given failure count, zero below the threshold.
    #[must_use]
    pub fn lockout_seconds(&self, failed_attempts: u32) -> u64 {
        if failed_attempts < self.threshold {
            return 0;
        }

        let exponent = failed_attempts - self.threshold;
        1u64.checked_shl(exponent)
            .unwrap_or(u64::MAX)
            .saturating_mul(self.base_seconds)
            .min(self.max_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct AttemptTracker {
    failed_attempts: u32,
    locked_out: bool,
    lockout_seconds_remaining: u64,
    #[serde(skip)]
    policy: LockoutPolicy,
}

impl Default for AttemptTracker {
    fn default() -> Self {
        Self::new(LockoutPolicy::default())
    }
}

impl AttemptTracker {
    #[must_use]
    pub const fn new(policy: LockoutPolicy) -> Self {
        Self {
            failed_attempts: 0,
            locked_out: false,
            lockout_seconds_remaining: 0,
            policy,
        }
    }

    /// Count one failed attempt and lock when the threshold is reached.
    ///
    /// Failures reported while already locked out are ignored; the running
    /// lockout is neither extended nor restarted.
    pub fn record_failure(&mut self) -> Self {
        if self.locked_out {
            debug!(
                remaining = self.lockout_seconds_remaining,
                "failure ignored while locked out"
            );
            return *self;
        }

        self.failed_attempts = self.failed_attempts.saturating_add(1);

        let lockout = self.policy.lockout_seconds(self.failed_attempts);
        if lockout > 0 {
            self.locked_out = true;
            self.lockout_seconds_remaining = lockout;
            warn!(
                failed_attempts = self.failed_attempts,
                lockout_seconds = lockout,
                "too many failed attempts, locking out"
            );
        }

        *self
    }

    /// Advance the lockout clock by one second.
    pub fn tick_lockout(&mut self) -> Self {
        if !self.locked_out {
            return *self;
        }

        self.lockout_seconds_remaining = self.lockout_seconds_remaining.saturating_sub(1);
        if self.lockout_seconds_remaining == 0 {
            self.locked_out = false;
            self.failed_attempts = 0;
            debug!("lockout elapsed");
        }

        *self
    }

    pub fn reset(&mut self) {
        self.failed_attempts = 0;
        self.locked_out = false;
        self.lockout_seconds_remaining = 0;
    }

    #[must_use]
    pub const fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    #[must_use]
    pub const fn is_locked_out(&self) -> bool {
        self.locked_out
    }

    #[must_use]
    pub const fn lockout_seconds_remaining(&self) -> u64 {
        self.lockout_seconds_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with(failed_attempts: u32) -> AttemptTracker {
        AttemptTracker {
            failed_attempts,
            ..AttemptTracker::default()
        }
    }

    #[test]
    fn below_threshold_never_locks() {
        let mut tracker = AttemptTracker::default();
        for expected in 1..5 {
            let snapshot = tracker.record_failure();
            assert_eq!(snapshot.failed_attempts(), expected);
            assert!(!snapshot.is_locked_out());
            assert_eq!(snapshot.lockout_seconds_remaining(), 0);
        }
    }

    #[test]
    fn fifth_failure_locks_for_thirty_seconds() {
        let mut tracker = tracker_with(4);
        let snapshot = tracker.record_failure();
        assert!(snapshot.is_locked_out());
        assert_eq!(snapshot.lockout_seconds_remaining(), 30);
    }

    #[test]
    fn seventh_failure_locks_for_two_minutes() {
        let mut tracker = tracker_with(6);
        let snapshot = tracker.record_failure();
        assert_eq!(snapshot.failed_attempts(), 7);
        assert_eq!(snapshot.lockout_seconds_remaining(), 120);
    }

    #[test]
    fn lockout_duration_follows_backoff_formula() {
        for failed in 5..40 {
            let mut tracker = tracker_with(failed - 1);
            let snapshot = tracker.record_failure();
            let expected = (2u64.saturating_pow(failed - 5).saturating_mul(30)).min(1800);
            assert_eq!(
                snapshot.lockout_seconds_remaining(),
                expected,
                "failed attempts: {failed}"
            );
        }
    }

    #[test]
    fn lockout_is_capped() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.lockout_seconds(11), 1800);
        assert_eq!(policy.lockout_seconds(200), 1800);
    }

    #[test]
    fn ticking_through_lockout_clears_it() {
        let mut tracker = tracker_with(4);
        let remaining = tracker.record_failure().lockout_seconds_remaining();

        for _ in 1..remaining {
            assert!(tracker.tick_lockout().is_locked_out());
        }

        let snapshot = tracker.tick_lockout();
        assert!(!snapshot.is_locked_out());
        assert_eq!(snapshot.lockout_seconds_remaining(), 0);
        assert_eq!(snapshot.failed_attempts(), 0);
    }

    #[test]
    fn failures_during_lockout_are_ignored() {
        let mut tracker = tracker_with(4);
        tracker.record_failure();
        tracker.tick_lockout();

        let snapshot = tracker.record_failure();
        assert_eq!(snapshot.failed_attempts(), 5);
        assert_eq!(snapshot.lockout_seconds_remaining(), 29);
    }

    #[test]
    fn tick_without_lockout_is_noop() {
        let mut tracker = tracker_with(2);
        assert_eq!(tracker.tick_lockout(), tracker_with(2));
    }

    #[test]
    fn reset_clears_everything() {
        let mut tracker = tracker_with(4);
        tracker.record_failure();
        tracker.reset();
        assert_eq!(tracker, AttemptTracker::default());
    }

    #[test]
    fn custom_policy_threshold() {
        let mut tracker = AttemptTracker::new(LockoutPolicy::new(2, 10, 100));
        assert!(!tracker.record_failure().is_locked_out());
        assert_eq!(tracker.record_failure().lockout_seconds_remaining(), 10);
    }
}
