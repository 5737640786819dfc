//! Bounded retry/backoff policy used for submission, polling, environment
//! applies and step retries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
    ExponentialWithJitter,
}

/// A bounded backoff schedule.
///
/// `max_attempts` counts the first try, so a policy with `max_attempts = 1`
/// never retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_strategy")]
    pub strategy: BackoffStrategy,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_strategy() -> BackoffStrategy {
    BackoffStrategy::Exponential
}
fn default_initial_ms() -> u64 {
    200
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_max_attempts() -> u32 {
    4
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            initial_ms: default_initial_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            initial_ms: delay.as_millis() as u64,
            multiplier: 1.0,
            max_delay_ms: delay.as_millis() as u64,
            max_attempts,
        }
    }

    pub fn exponential(initial: Duration, multiplier: f64, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            initial_ms: initial.as_millis() as u64,
            multiplier,
            max_delay_ms: max_delay.as_millis() as u64,
            max_attempts,
        }
    }

    /// Submission retries: 4 attempts, 200ms doubling, capped at 5s.
    pub fn submit_default() -> Self {
        Self::default()
    }

    /// Poll interval: 250ms growing by 1.5x up to 3s. Attempts are bounded
    /// by the poll deadline instead.
    pub fn poll_default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            initial_ms: 250,
            multiplier: 1.5,
            max_delay_ms: 3_000,
            max_attempts: u32::MAX,
        }
    }

    /// Step retries in the coordinator: 3 attempts, 500ms doubling, capped at 10s.
    pub fn step_default() -> Self {
        Self {
            strategy: BackoffStrategy::ExponentialWithJitter,
            initial_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            max_attempts: 3,
        }
    }

    /// Whether another attempt is allowed after `attempts` tries.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay to wait before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.initial_ms as f64;
        let exp = retry.min(i32::MAX as u32) as i32;
        let ms = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => base * self.multiplier.powi(exp),
            BackoffStrategy::ExponentialWithJitter => {
                let multiplied = base * self.multiplier.powi(exp);
                multiplied + rand::random::<f64>() * multiplied * 0.1
            }
        };
        let capped = if ms.is_finite() {
            (ms as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(capped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let p = BackoffPolicy::exponential(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(1_000),
            5,
        );
        assert_eq!(p.delay(0), Duration::from_millis(100));
        assert_eq!(p.delay(1), Duration::from_millis(200));
        assert_eq!(p.delay(2), Duration::from_millis(400));
        assert_eq!(p.delay(4), Duration::from_millis(1_000));
        assert_eq!(p.delay(60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_fixed_delay() {
        let p = BackoffPolicy::fixed(Duration::from_millis(50), 3);
        assert_eq!(p.delay(0), p.delay(7));
        assert!(p.allows_retry(2));
        assert!(!p.allows_retry(3));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let p = BackoffPolicy {
            strategy: BackoffStrategy::ExponentialWithJitter,
            initial_ms: 1_000,
            multiplier: 1.0,
            max_delay_ms: 10_000,
            max_attempts: 3,
        };
        for _ in 0..50 {
            let d = p.delay(3).as_millis();
            assert!((1_000..=1_100).contains(&d));
        }
    }

    #[test]
    fn test_serde_defaults() {
        let p: BackoffPolicy = serde_json::from_str(r#"{"max_attempts": 2}"#).unwrap();
        assert_eq!(p.max_attempts, 2);
        assert_eq!(p.initial_ms, 200);
        assert_eq!(p.strategy, BackoffStrategy::Exponential);
    }
}
