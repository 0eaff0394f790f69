//! Exponential backoff schedule for retried work items.
//!
//! Delays double per attempt from a 30-second base and cap at 10 minutes,
//! with ±20 % jitter. The jitter is derived from a hash of
//! `(key, attempt)` rather than a random source, so a given item's
//! schedule is deterministic and tests need no injected clock.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

/// Backoff schedule parameters.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,

    /// Cap for exponential growth (applied before jitter).
    pub cap: Duration,

    /// Jitter half-width as a percentage (20 means ±20 %).
    pub jitter_percent: u8,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(600),
            jitter_percent: 20,
        }
    }
}

impl Backoff {
    /// The delay before retry number `attempt` (1-indexed) of `key`.
    pub fn delay(&self, key: &str, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        let offset = self.jitter_offset(key, attempt);
        nominal.mul_f64(1.0 + offset)
    }

    /// The un-jittered delay for an attempt: `base * 2^(attempt-1)`,
    /// capped.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(32);
        let secs = self.base.as_secs_f64() * 2f64.powi(doublings as i32);
        Duration::from_secs_f64(secs.min(self.cap.as_secs_f64()))
    }

    /// Deterministic jitter in `[-jitter_percent, +jitter_percent] / 100`.
    fn jitter_offset(&self, key: &str, attempt: u32) -> f64 {
        if self.jitter_percent == 0 {
            return 0.0;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        attempt.hash(&mut hasher);
        let span = 2 * self.jitter_percent as u64 + 1;
        let offset = (hasher.finish() % span) as i64 - self.jitter_percent as i64;
        offset as f64 / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn nominal_doubles_from_base() {
        let b = Backoff::default();
        assert_eq!(b.nominal(1), Duration::from_secs(30));
        assert_eq!(b.nominal(2), Duration::from_secs(60));
        assert_eq!(b.nominal(3), Duration::from_secs(120));
        assert_eq!(b.nominal(4), Duration::from_secs(240));
        assert_eq!(b.nominal(5), Duration::from_secs(480));
    }

    #[test]
    fn nominal_caps_at_ten_minutes() {
        let b = Backoff::default();
        assert_eq!(b.nominal(6), Duration::from_secs(600));
        assert_eq!(b.nominal(20), Duration::from_secs(600));
    }

    #[test]
    fn first_retry_is_within_jitter_window() {
        let b = Backoff::default();
        for key in ["app:42", "mono:1", "os:999"] {
            let d = b.delay(key, 1);
            assert!(
                d >= Duration::from_secs(24) && d <= Duration::from_secs(36),
                "delay {d:?} for {key} outside [24s, 36s]"
            );
        }
    }

    #[test]
    fn jitter_is_deterministic() {
        let b = Backoff::default();
        assert_eq!(b.delay("app:42", 3), b.delay("app:42", 3));
    }

    #[test]
    fn zero_jitter_is_exact() {
        let b = Backoff {
            jitter_percent: 0,
            ..Backoff::default()
        };
        assert_eq!(b.delay("app:42", 1), Duration::from_secs(30));
    }

    proptest! {
        /// Nominal delays never decrease with the attempt number.
        #[test]
        fn nominal_is_monotonic(a in 1u32..50, b in 1u32..50) {
            let backoff = Backoff::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(backoff.nominal(lo) <= backoff.nominal(hi));
        }

        /// Jittered delays stay inside the ±20 % window around nominal.
        #[test]
        fn jitter_stays_in_window(key in "[a-z]{1,8}:[0-9]{1,5}", attempt in 1u32..12) {
            let backoff = Backoff::default();
            let nominal = backoff.nominal(attempt);
            let delay = backoff.delay(&key, attempt);
            prop_assert!(delay >= nominal.mul_f64(0.8));
            prop_assert!(delay <= nominal.mul_f64(1.2));
        }
    }
}
