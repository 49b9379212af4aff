//! Consecutive-failure tracking and exponential backoff, one tracker per dataset.

use crate::config::RefreshConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Pure backoff policy: `min(base * factor^n, cap)`, zero when nothing has failed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &RefreshConfig) -> Self {
        Self {
            base: config.backoff_base,
            factor: config.backoff_factor,
            cap: config.backoff_cap,
        }
    }

    pub fn backoff_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::try_from_secs_f64(secs)
            .map(|d| d.min(self.cap))
            .unwrap_or(self.cap)
    }
}

/// Copy of a tracker's counters, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureState {
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Inner {
    consecutive_failures: u32,
    /// Monotonic stamp for delay math, wall-clock stamp for reporting.
    last_failure: Option<(Instant, DateTime<Utc>)>,
}

/// Counts consecutive failed cycles of one dataset.
///
/// Written only by the scheduler loop; read by it and by the force-refresh
/// path. The lock is never held across an await.
#[derive(Debug)]
pub struct FailureTracker {
    policy: BackoffPolicy,
    inner: Mutex<Inner>,
}

impl FailureTracker {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The guarded fields stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait still owed before a new attempt may start.
    pub fn should_delay(&self) -> Duration {
        let inner = self.lock();
        match inner.last_failure {
            Some((at, _)) => self
                .policy
                .backoff_for(inner.consecutive_failures)
                .saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some((Instant::now(), Utc::now()));
    }

    pub fn state(&self) -> FailureState {
        let inner = self.lock();
        FailureState {
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure.map(|(_, at)| at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(300),
            factor: 2.0,
            cap: Duration::from_secs(7200),
        }
    }

    #[test]
    fn backoff_is_zero_without_failures() {
        assert_eq!(policy().backoff_for(0), Duration::ZERO);
    }

    #[test]
    fn backoff_grows_geometrically() {
        let p = policy();
        assert_eq!(p.backoff_for(1), Duration::from_secs(600));
        assert_eq!(p.backoff_for(2), Duration::from_secs(1200));
        assert_eq!(p.backoff_for(3), Duration::from_secs(2400));
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let p = policy();
        let mut previous = Duration::ZERO;
        for n in 0..200 {
            let delay = p.backoff_for(n);
            assert!(delay >= previous, "backoff decreased at n={n}");
            assert!(delay <= p.cap);
            previous = delay;
        }
        assert_eq!(p.backoff_for(u32::MAX), p.cap);
    }

    #[test]
    fn unit_factor_stays_at_base() {
        let p = BackoffPolicy {
            factor: 1.0,
            ..policy()
        };
        assert_eq!(p.backoff_for(7), Duration::from_secs(300));
    }

    #[test]
    fn success_clears_failure_state() {
        let tracker = FailureTracker::new(policy());
        tracker.record_failure();
        tracker.record_failure();
        assert_eq!(tracker.state().consecutive_failures, 2);
        assert!(tracker.state().last_failure_at.is_some());

        tracker.record_success();
        assert_eq!(
            tracker.state(),
            FailureState {
                consecutive_failures: 0,
                last_failure_at: None
            }
        );
        assert_eq!(tracker.should_delay(), Duration::ZERO);

        tracker.record_failure();
        assert_eq!(tracker.state().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_shrinks_as_time_passes() {
        let tracker = FailureTracker::new(policy());
        tracker.record_failure();
        assert_eq!(tracker.should_delay(), Duration::from_secs(600));

        tokio::time::advance(Duration::from_secs(250)).await;
        assert_eq!(tracker.should_delay(), Duration::from_secs(350));

        tokio::time::advance(Duration::from_secs(1000)).await;
        assert_eq!(tracker.should_delay(), Duration::ZERO);
    }
}
