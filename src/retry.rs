//! Bounded retry with backoff, driven by an injectable clock.

use std::time::{Duration, SystemTime};

/// Source of time for anything that sleeps or timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep(&self, duration: Duration);
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// How often and how patiently to retry an operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub attempts: u32,
    pub initial_backoff: Duration,
    /// Factor applied to the backoff after each failed attempt.
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(500),
            multiplier: 1,
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Calls `op` until it returns `Some` or the attempts run out, sleeping
    /// on `clock` between attempts. `op` receives the zero-based attempt
    /// number.
    pub fn run<T>(&self, clock: &dyn Clock, mut op: impl FnMut(u32) -> Option<T>) -> Option<T> {
        let attempts = self.attempts.max(1);
        let mut backoff = self.initial_backoff;
        for attempt in 0..attempts {
            if let Some(value) = op(attempt) {
                return Some(value);
            }
            if attempt + 1 < attempts {
                clock.sleep(backoff.min(self.max_backoff));
                backoff = backoff.saturating_mul(self.multiplier.max(1));
            }
        }
        None
    }
}

/// Clock for tests: time only moves when something sleeps.
#[cfg(test)]
pub(crate) struct ManualClock {
    now: parking_lot::Mutex<SystemTime>,
    sleeps: parking_lot::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            now: parking_lot::Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000)),
            sleeps: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        *self.now.lock() += duration;
        self.sleeps.lock().push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_success_does_not_sleep() {
        let clock = ManualClock::new();
        let result = RetryPolicy::default().run(&clock, |_| Some(7));
        assert_eq!(result, Some(7));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_gives_up_after_attempts() {
        let clock = ManualClock::new();
        let mut calls = 0;
        let result: Option<()> = RetryPolicy::default().run(&clock, |_| {
            calls += 1;
            None
        });
        assert_eq!(result, None);
        assert_eq!(calls, 5);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500); 4]);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let clock = ManualClock::new();
        let policy = RetryPolicy {
            attempts: 5,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2,
            max_backoff: Duration::from_secs(3),
        };
        let result = policy.run(&clock, |attempt| (attempt == 4).then_some(attempt));
        assert_eq!(result, Some(4));
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );
    }

    #[test]
    fn test_zero_attempts_runs_once() {
        let clock = ManualClock::new();
        let policy = RetryPolicy {
            attempts: 0,
            ..Default::default()
        };
        let mut calls = 0;
        let _: Option<()> = policy.run(&clock, |_| {
            calls += 1;
            None
        });
        assert_eq!(calls, 1);
    }
}
