//! Retry schedule for transient transit failures.
//!
//! An explicit `{attempt, budget}` state machine rather than a recursive
//! rescheduling chain: the client calls [`RetrySchedule::next_delay`] after
//! each retryable failure and sleeps on a tokio timer for the returned
//! duration. Delay is `min(base × 2^attempt, 5s)` with ±25% jitter.

use rand::Rng;
use std::time::Duration;

/// Hard cap on the exponential backoff, before jitter.
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Jitter applied to every delay: a uniform factor in `[0.75, 1.25]`.
pub const JITTER_FRACTION: f64 = 0.25;

/// Attempt accounting for one logical operation.
#[derive(Debug)]
pub struct RetrySchedule {
    attempt: u32,
    max_retries: u32,
    base: Duration,
}

impl RetrySchedule {
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self {
            attempt: 0,
            max_retries,
            base,
        }
    }

    /// Zero-based index of the attempt currently in flight.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Account one failed attempt.
    ///
    /// Returns the delay before the next attempt, or `None` when the retry
    /// budget is exhausted and the last error must propagate.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let delay = jittered(backoff(self.base, self.attempt));
        self.attempt += 1;
        Some(delay)
    }
}

/// `min(base × 2^attempt, MAX_BACKOFF)`, without jitter.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let exp_ms = base.as_millis() as f64 * 2f64.powi(attempt.min(32) as i32);
    let capped_ms = exp_ms.min(MAX_BACKOFF.as_millis() as f64);
    Duration::from_millis(capped_ms as u64)
}

fn jittered(delay: Duration) -> Duration {
    let factor = 1.0 + rand::rng().random_range(-JITTER_FRACTION..=JITTER_FRACTION);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_exactly_max_retries_delays() {
        let mut schedule = RetrySchedule::new(3, Duration::from_millis(1));
        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_none());
        assert!(schedule.next_delay().is_none());
    }

    #[test]
    fn zero_retries_never_delays() {
        let mut schedule = RetrySchedule::new(0, Duration::from_millis(100));
        assert!(schedule.next_delay().is_none());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 0), Duration::from_millis(100));
        assert_eq!(backoff(base, 1), Duration::from_millis(200));
        assert_eq!(backoff(base, 2), Duration::from_millis(400));
    }

    #[test]
    fn backoff_caps_at_five_seconds() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 10), MAX_BACKOFF);
        // Large attempt numbers must not overflow.
        assert_eq!(backoff(base, u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn zero_base_stays_zero() {
        assert_eq!(backoff(Duration::ZERO, 5), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_quarter() {
        let delay = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = jittered(delay);
            assert!(d >= Duration::from_millis(750), "{d:?}");
            assert!(d <= Duration::from_millis(1250), "{d:?}");
        }
    }

    #[test]
    fn delays_never_exceed_cap_plus_jitter() {
        let mut schedule = RetrySchedule::new(20, Duration::from_secs(1));
        while let Some(delay) = schedule.next_delay() {
            assert!(delay <= Duration::from_millis(6250), "{delay:?}");
        }
    }
}
