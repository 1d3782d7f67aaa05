//! Bounded polling with an injectable clock
//!
//! Every wait in this crate is a fixed number of attempts separated by
//! a fixed sleep. The sleep goes through a [`Clock`] so tests can swap
//! in a [`ManualClock`] and check retry budgets without real delays.

use std::ops::ControlFlow;
use std::sync::Mutex;
use std::time::Duration;

/// Source of delays between poll attempts.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that never blocks and only records how long it was asked to sleep.
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total time callers have slept on this clock.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self
            .elapsed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        let mut elapsed = self
            .elapsed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *elapsed += duration;
    }
}

/// A retry budget: at most `attempts` tries, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    /// Budget of the read-until engine: 1000 x 10ms.
    pub const READ_UNTIL: Self = Self::new(1000, Duration::from_millis(10));

    /// Budget of the port probe: 40 x 25ms.
    pub const PORT_PROBE: Self = Self::new(40, Duration::from_millis(25));

    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Worst-case time spent sleeping.
    #[must_use]
    pub const fn total(&self) -> Duration {
        self.interval.saturating_mul(self.attempts)
    }

    /// Call `step` until it breaks or the budget runs out.
    ///
    /// Sleeps `interval` on `clock` after every attempt that returns
    /// `Continue`. Returns `Ok(None)` when the budget is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `step`.
    pub fn run<T, E>(
        &self,
        clock: &dyn Clock,
        mut step: impl FnMut() -> Result<ControlFlow<T>, E>,
    ) -> Result<Option<T>, E> {
        for _ in 0..self.attempts {
            if let ControlFlow::Break(value) = step()? {
                return Ok(Some(value));
            }
            clock.sleep(self.interval);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_budget_sleeps_every_attempt() {
        let clock = ManualClock::new();
        let mut calls = 0;
        let outcome: Result<Option<()>, ()> = PollBudget::READ_UNTIL.run(&clock, || {
            calls += 1;
            Ok(ControlFlow::Continue(()))
        });
        assert_eq!(outcome, Ok(None));
        assert_eq!(calls, 1000);
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn break_stops_early() {
        let clock = ManualClock::new();
        let mut calls = 0;
        let outcome: Result<Option<u32>, ()> = PollBudget::PORT_PROBE.run(&clock, || {
            calls += 1;
            Ok(if calls == 3 {
                ControlFlow::Break(calls)
            } else {
                ControlFlow::Continue(())
            })
        });
        assert_eq!(outcome, Ok(Some(3)));
        assert_eq!(clock.elapsed(), Duration::from_millis(50));
    }

    #[test]
    fn error_aborts_polling() {
        let clock = ManualClock::new();
        let outcome: Result<Option<()>, &str> =
            PollBudget::new(5, Duration::from_millis(1)).run(&clock, || Err("boom"));
        assert_eq!(outcome, Err("boom"));
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn totals() {
        assert_eq!(PollBudget::READ_UNTIL.total(), Duration::from_secs(10));
        assert_eq!(PollBudget::PORT_PROBE.total(), Duration::from_secs(1));
    }
}
