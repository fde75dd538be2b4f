//! Bounded retry with an injectable clock.
//!
//! All waiting in the pipeline goes through the [`Clock`] trait so tests can
//! run transient-failure scenarios without sleeping.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Source of time and sleep for components that wait between attempts.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic clock for tests. Sleeping advances virtual time instead of
/// blocking, and every sleep is recorded for assertion.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = *now + step;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        self.sleeps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(duration);
    }
}

/// A fixed number of attempts with a fixed pause between them. No backoff;
/// the archive either catches up within the budget or it does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Runs `op` up to `attempts` times, sleeping `delay` between attempts
    /// but not after the last one. Returns the first success, or `None` once
    /// the budget is spent or `cancel` is set.
    pub fn run<T, E, F>(&self, clock: &dyn Clock, cancel: &AtomicBool, mut op: F) -> Option<T>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: fmt::Display,
    {
        for attempt in 1..=self.attempts {
            if cancel.load(Ordering::SeqCst) {
                debug!(attempt, "Retry loop cancelled");
                return None;
            }
            match op(attempt) {
                Ok(value) => return Some(value),
                Err(err) => {
                    debug!(error = %err, attempt, limit = self.attempts, "Attempt failed");
                }
            }
            if attempt < self.attempts && !cancel.load(Ordering::SeqCst) {
                clock.sleep(self.delay);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn at(timestamp: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(timestamp)
            .expect("parse timestamp")
            .with_timezone(&Utc)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(15, Duration::from_secs(1))
    }

    #[test]
    fn returns_first_success_without_sleeping() {
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);
        let result = policy().run(&clock, &cancel, |_| Ok::<_, String>(42));
        assert_eq!(result, Some(42));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn sleeps_between_attempts_but_not_after_the_last() {
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let result: Option<u32> = policy().run(&clock, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>("archive not ready".to_string())
        });
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 15);
        assert_eq!(clock.sleeps().len(), 14);
        assert!(clock.sleeps().iter().all(|d| *d == Duration::from_secs(1)));
    }

    #[test]
    fn succeeds_midway_after_transient_failures() {
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);
        let result = policy().run(&clock, &cancel, |attempt| {
            if attempt < 4 {
                Err("not yet".to_string())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Some(4));
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[test]
    fn virtual_time_advances_with_each_sleep() {
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);
        let _: Option<u32> =
            RetryPolicy::new(3, Duration::from_secs(1)).run(&clock, &cancel, |_| {
                Err::<u32, _>("nope".to_string())
            });
        assert_eq!(clock.now(), at("2026-03-01T10:00:02Z"));
    }

    #[test]
    fn cancellation_stops_the_loop_early() {
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(false);
        let calls = AtomicU32::new(0);
        let result: Option<u32> = policy().run(&clock, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            cancel.store(true, Ordering::SeqCst);
            Err::<u32, _>("interrupted".to_string())
        });
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // No pointless pause once shutdown is requested.
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn cancellation_before_the_first_attempt_skips_the_operation() {
        let clock = ManualClock::starting_at(at("2026-03-01T10:00:00Z"));
        let cancel = AtomicBool::new(true);
        let calls = AtomicU32::new(0);
        let result: Option<u32> = policy().run(&clock, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<u32, String>(1)
        });
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
