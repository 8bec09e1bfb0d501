//! Retry backoff schedule.
//!
//! Exponential growth from a base delay up to a hard cap, plus a small
//! random jitter so a burst of timed-out callers does not re-ask a slow
//! tool in lockstep.

use crate::types::RetryConfig;
use std::time::Duration;

/// Precomputed backoff parameters for one call's retry loop.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
    enable_jitter: bool,
}

impl BackoffSchedule {
    pub fn from_config(retry: &RetryConfig) -> Self {
        Self {
            base_delay: retry.base_delay,
            max_delay: retry.max_delay,
            jitter: retry.jitter,
            enable_jitter: !retry.jitter.is_zero(),
        }
    }

    /// Schedule without jitter. Deterministic; what tests and benches
    /// want when asserting exact delays.
    pub fn without_jitter(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: Duration::ZERO,
            enable_jitter: false,
        }
    }

    /// Delay before retry number `retry_index` (1-based).
    ///
    /// `base * 2^(retry_index - 1)` capped at `max_delay`, then jittered
    /// by a uniform draw from `[0, jitter)`. Saturating arithmetic keeps
    /// this total for any configured durations.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let exponent = retry_index.saturating_sub(1).min(31);
        let exponential = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = exponential.min(self.max_delay);

        if !self.enable_jitter {
            return capped;
        }
        // the factor is below 1.0, so mul_f64 cannot overflow
        let jitter = self.jitter.mul_f64(rand::random::<f64>());
        capped.saturating_add(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_schedule_doubles_until_cap() {
        let schedule =
            BackoffSchedule::without_jitter(Duration::from_millis(500), Duration::from_secs(2));

        assert_eq!(schedule.delay_for(1), Duration::from_millis(500));
        assert_eq!(schedule.delay_for(2), Duration::from_millis(1000));
        assert_eq!(schedule.delay_for(3), Duration::from_millis(2000));
        // capped from here on
        assert_eq!(schedule.delay_for(4), Duration::from_millis(2000));
        assert_eq!(schedule.delay_for(10), Duration::from_millis(2000));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let schedule = BackoffSchedule::from_config(&RetryConfig::default());
        for _ in 0..100 {
            let delay = schedule.delay_for(1);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay < Duration::from_millis(600));
        }
    }

    #[test]
    fn test_zero_jitter_config_is_deterministic() {
        let config = RetryConfig {
            jitter: Duration::ZERO,
            ..RetryConfig::default()
        };
        let schedule = BackoffSchedule::from_config(&config);
        assert_eq!(schedule.delay_for(2), schedule.delay_for(2));
    }

    proptest! {
        #[test]
        fn prop_delays_are_monotonically_non_decreasing(retry in 1u32..64) {
            let schedule = BackoffSchedule::without_jitter(
                Duration::from_millis(500),
                Duration::from_secs(2),
            );
            prop_assert!(schedule.delay_for(retry + 1) >= schedule.delay_for(retry));
        }

        #[test]
        fn prop_delay_never_exceeds_cap_plus_jitter(retry in 1u32..1000) {
            let config = RetryConfig::default();
            let schedule = BackoffSchedule::from_config(&config);
            let bound = config.max_delay + config.jitter;
            prop_assert!(schedule.delay_for(retry) <= bound);
        }
    }
}
