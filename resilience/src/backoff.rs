//! Exponential backoff with jitter, and the sleeper the orchestrator waits on.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::ContractError;

/// Delay-before-retry policy.
///
/// `delay(n) = min(base * multiplier^(n-1), cap) + U[0, jitter_fraction * base]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (default: 1s).
    pub base: Duration,
    /// Growth factor per attempt (default: 2.0).
    pub multiplier: f64,
    /// Upper bound of the exponential component (default: 30s).
    pub cap: Duration,
    /// Maximum jitter as a fraction of `base` (default: 0.1).
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 2.0,
            cap: Duration::from_secs(30),
            jitter_fraction: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Set the base delay.
    #[must_use]
    pub const fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the cap of the exponential component.
    #[must_use]
    pub const fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Set the jitter fraction.
    #[must_use]
    pub const fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction;
        self
    }

    /// Checks that the policy is usable.
    pub fn validate(&self) -> Result<(), ContractError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ContractError::InvalidConfig(format!(
                "backoff multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ContractError::InvalidConfig(format!(
                "jitter fraction must be within [0, 1], got {}",
                self.jitter_fraction
            )));
        }
        if self.base > self.cap {
            return Err(ContractError::InvalidConfig(format!(
                "backoff base {:?} exceeds cap {:?}",
                self.base, self.cap
            )));
        }
        Ok(())
    }

    /// The deterministic exponential component for `attempt` (1-indexed).
    ///
    /// Attempt 0 is treated as attempt 1. Overflow saturates at `cap`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use metanovel_resilience::BackoffPolicy;
    ///
    /// let policy = BackoffPolicy::default();
    /// assert_eq!(policy.base_delay(1), Duration::from_secs(1));
    /// assert_eq!(policy.base_delay(3), Duration::from_secs(4));
    /// assert_eq!(policy.base_delay(50), Duration::from_secs(30));
    /// ```
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.cap)
    }

    /// Largest jitter that can be added to any delay.
    #[must_use]
    pub fn max_jitter(&self) -> Duration {
        if !self.jitter_fraction.is_finite() {
            return Duration::ZERO;
        }
        let secs = self.base.as_secs_f64() * self.jitter_fraction.clamp(0.0, 1.0);
        Duration::try_from_secs_f64(secs).map_or(self.base, |jitter| jitter.min(self.base))
    }

    /// Delay before retry number `attempt`, with jitter drawn from `rng`.
    ///
    /// Deterministic for a seeded `rng`; bounded by `cap + max_jitter()`,
    /// saturating at `Duration::MAX`.
    pub fn delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let max_jitter = self.max_jitter();
        let jitter = if max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let secs = rng.random_range(0.0..=max_jitter.as_secs_f64());
            Duration::try_from_secs_f64(secs).map_or(max_jitter, |j| j.min(max_jitter))
        };
        self.base_delay(attempt).saturating_add(jitter)
    }
}

/// Something that can wait for a duration.
///
/// The orchestrator sleeps only through this trait, so tests can record
/// backoff delays without waiting for them.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_base_delay_is_monotonic_and_capped() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=64 {
            let delay = policy.base_delay(attempt);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= policy.cap);
            previous = delay;
        }
        assert_eq!(policy.base_delay(0), policy.base_delay(1));
        assert_eq!(policy.base_delay(u32::MAX), policy.cap);
    }

    #[test]
    fn test_delay_bounded_by_cap_plus_jitter() {
        let policy = BackoffPolicy::default().with_jitter_fraction(0.5);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 1..=40 {
            let delay = policy.delay(attempt, &mut rng);
            assert!(delay >= policy.base_delay(attempt));
            assert!(delay <= policy.cap + policy.max_jitter());
        }
    }

    #[test]
    fn test_delay_is_deterministic_for_seed() {
        let policy = BackoffPolicy::default();
        let a: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(42);
            (1..=5).map(|n| policy.delay(n, &mut rng)).collect()
        };
        let b: Vec<_> = {
            let mut rng = StdRng::seed_from_u64(42);
            (1..=5).map(|n| policy.delay(n, &mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = BackoffPolicy::default()
            .with_base(Duration::from_millis(100))
            .with_jitter_fraction(0.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.delay(2, &mut rng), Duration::from_millis(200));
    }

    #[test]
    fn test_huge_durations_saturate() {
        let policy = BackoffPolicy::default()
            .with_base(Duration::MAX)
            .with_cap(Duration::MAX)
            .with_jitter_fraction(1.0);
        let mut rng = StdRng::seed_from_u64(3);
        for attempt in [1, 2, 64, u32::MAX] {
            assert_eq!(policy.delay(attempt, &mut rng), Duration::MAX);
        }

        let policy = BackoffPolicy::default()
            .with_base(Duration::from_secs(10_000_000_000_000_000_000))
            .with_cap(Duration::from_secs(10_000_000_000_000_000_000));
        assert!(policy.delay(3, &mut rng) >= policy.cap);
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        assert!(BackoffPolicy::default().validate().is_ok());
        assert!(BackoffPolicy::default().with_multiplier(0.5).validate().is_err());
        assert!(BackoffPolicy::default().with_multiplier(f64::NAN).validate().is_err());
        assert!(BackoffPolicy::default().with_jitter_fraction(1.5).validate().is_err());
        assert!(BackoffPolicy::default()
            .with_base(Duration::from_secs(60))
            .validate()
            .is_err());
    }
}
