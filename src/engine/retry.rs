use std::time::Duration;

use anyhow::{bail, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff schedule attached to a task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    /// Upper bound of the uniform jitter added to each delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    pub fn remote_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            jitter_ms: 500,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            bail!("retry policy max_attempts must be at least 1");
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            bail!(
                "retry policy multiplier must be a finite value >= 1.0 (got {})",
                self.multiplier
            );
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based) with an explicit jitter sample.
    pub fn delay_with_jitter(&self, retry: u32, jitter_ms: u64) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let scaled = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        let base_ms = if scaled.is_finite() && scaled > 0.0 {
            scaled.min(u64::MAX as f64 / 2.0) as u64
        } else {
            0
        };
        Duration::from_millis(base_ms.saturating_add(jitter_ms.min(self.jitter_ms)))
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        self.delay_with_jitter(retry, jitter)
    }

    /// Next delay, forced strictly above the previous one so that jitter can
    /// never make a later retry fire sooner than an earlier one.
    pub fn next_delay(&self, retry: u32, previous: Option<Duration>) -> Duration {
        let candidate = self.delay_for(retry);
        match previous {
            Some(prev) if candidate <= prev => prev + Duration::from_millis(1),
            _ => candidate,
        }
    }

    pub fn allows_attempt(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_attempts_and_shrinking_multiplier() {
        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(zero.validate().is_err());

        let shrinking = RetryPolicy {
            multiplier: 0.5,
            ..RetryPolicy::default()
        };
        assert!(shrinking.validate().is_err());

        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[test]
    fn delay_grows_geometrically() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            multiplier: 2.0,
            jitter_ms: 0,
        };
        assert_eq!(policy.delay_with_jitter(1, 0), Duration::from_millis(100));
        assert_eq!(policy.delay_with_jitter(2, 0), Duration::from_millis(200));
        assert_eq!(policy.delay_with_jitter(3, 0), Duration::from_millis(400));
    }

    #[test]
    fn jitter_is_clamped_to_bound() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 100,
            multiplier: 1.0,
            jitter_ms: 10,
        };
        assert_eq!(policy.delay_with_jitter(1, 500), Duration::from_millis(110));
    }

    #[test]
    fn next_delay_is_strictly_increasing_even_with_flat_policy() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 50,
            multiplier: 1.0,
            jitter_ms: 0,
        };
        let first = policy.next_delay(1, None);
        let second = policy.next_delay(2, Some(first));
        let third = policy.next_delay(3, Some(second));
        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn huge_exponent_does_not_overflow() {
        let policy = RetryPolicy {
            max_attempts: 200,
            base_delay_ms: u64::MAX / 4,
            multiplier: 10.0,
            jitter_ms: 0,
        };
        let delay = policy.delay_with_jitter(150, 0);
        assert!(delay >= Duration::ZERO);
    }
}
