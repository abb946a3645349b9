use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use super::{DeliveryOutcome, truncate_error};

/// Exponential backoff with bounded random jitter, plus the dead-letter threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Failed attempts after which a row is dead-lettered.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Jitter upper bound as a fraction of the base delay, clamped to `0.0..=1.0`
    /// when used. Non-finite values disable jitter.
    pub jitter: f64,
    /// Maximum stored error length, in characters.
    pub error_cap: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        crate::PublisherConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    /// Backoff before jitter for the `n`-th failure (1-indexed):
    /// `min(max_backoff, base_backoff * 2^(n-1))`.
    pub fn base_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        // 2^31 already overflows any sane base; clamp the exponent instead of the product.
        let exp = (failures - 1).min(31);
        self.base_backoff
            .checked_mul(1u32 << exp)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    /// Backoff with 0..=jitter random extra, re-capped at `max_backoff`.
    pub fn delay(&self, failures: u32) -> Duration {
        let base = self.base_delay(failures);
        let jitter = self.jitter_fraction();
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.0..=jitter);
        (base + base.mul_f64(factor)).min(self.max_backoff)
    }

    fn jitter_fraction(&self) -> f64 {
        if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Outcome of a failed attempt on a row that had `retry_count` failures so far.
    ///
    /// The incremented count reaching `max_retries` dead-letters the row.
    pub fn failure_outcome(
        &self,
        retry_count: i32,
        error: &str,
        now: DateTime<Utc>,
    ) -> DeliveryOutcome {
        let retry_count = retry_count.saturating_add(1);
        let error = truncate_error(error, self.error_cap);

        if i64::from(retry_count) >= i64::from(self.max_retries) {
            return DeliveryOutcome::Dead {
                retry_count,
                error,
                tried_at: now,
            };
        }

        let delay = self.delay(u32::try_from(retry_count).unwrap_or(u32::MAX));
        let next_retry_at =
            now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        DeliveryOutcome::Failed {
            retry_count,
            error,
            tried_at: now,
            next_retry_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
    }

    #[test]
    fn base_delay_doubles_then_caps() {
        let p = policy();
        assert_eq!(p.base_delay(0), Duration::ZERO);
        assert_eq!(p.base_delay(1), Duration::from_millis(500));
        assert_eq!(p.base_delay(2), Duration::from_millis(1000));
        assert_eq!(p.base_delay(5), Duration::from_millis(8000));
        assert_eq!(p.base_delay(8), Duration::from_secs(60));
        assert_eq!(p.base_delay(200), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_ten_percent_and_cap() {
        let p = policy();
        for n in 1..12 {
            let base = p.base_delay(n);
            for _ in 0..50 {
                let d = p.delay(n);
                assert!(d >= base);
                assert!(d <= base.mul_f64(1.1) + Duration::from_nanos(1));
                assert!(d <= p.max_backoff);
            }
        }
    }

    #[test]
    fn out_of_range_jitter_never_panics() {
        for jitter in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.5] {
            let p = RetryPolicy { jitter, ..policy() };
            assert_eq!(p.delay(3), p.base_delay(3), "jitter {jitter}");
        }

        let p = RetryPolicy { jitter: 7.0, ..policy() };
        for _ in 0..50 {
            let d = p.delay(3);
            assert!(d >= p.base_delay(3));
            assert!(d <= p.base_delay(3) * 2);
        }
    }

    #[test]
    fn tenth_failure_dead_letters() {
        let p = policy();
        let now = Utc::now();

        match p.failure_outcome(8, "boom", now) {
            DeliveryOutcome::Failed {
                retry_count,
                next_retry_at,
                ..
            } => {
                assert_eq!(retry_count, 9);
                assert!(next_retry_at > now);
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        match p.failure_outcome(9, "boom", now) {
            DeliveryOutcome::Dead { retry_count, .. } => assert_eq!(retry_count, 10),
            other => panic!("expected Dead, got {other:?}"),
        }
    }

    #[test]
    fn failure_error_is_capped() {
        let outcome = policy().failure_outcome(0, &"e".repeat(5000), Utc::now());
        match outcome {
            DeliveryOutcome::Failed { error, .. } => assert_eq!(error.chars().count(), 2000),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: base backoff is monotone in the failure count and never exceeds the cap.
            #[test]
            fn base_backoff_is_monotone_and_capped(
                n in 1u32..64,
                base_ms in 1u64..5_000,
                max_ms in 5_000u64..600_000,
            ) {
                let p = RetryPolicy {
                    base_backoff: Duration::from_millis(base_ms),
                    max_backoff: Duration::from_millis(max_ms),
                    ..RetryPolicy::default()
                };
                prop_assert!(p.base_delay(n + 1) >= p.base_delay(n));
                prop_assert!(p.base_delay(n) <= p.max_backoff);
                prop_assert!(p.delay(n) <= p.max_backoff);
            }
        }
    }
}
