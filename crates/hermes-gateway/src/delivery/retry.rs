//! Capped exponential backoff with jitter for outbox redelivery.

use std::time::Duration;

use rand::Rng;

use crate::config::DeliverySection;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts before an event turns `failed` (including the first).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay (0.0 to 1.0) added or removed at random.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(cfg: &DeliverySection) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter: cfg.jitter,
        }
    }

    /// Un-jittered delay after the `attempts`-th failure: `base * 2^(attempts-1)`, capped.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(2_u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }

    /// Backoff with jitter applied, never above `max_delay`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        apply_jitter(self.backoff(attempts), self.jitter).min(self.max_delay)
    }

    /// Delay used after an outage; outages do not grow the backoff.
    pub fn outage_delay(&self) -> Duration {
        self.base_delay
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let range = delay.as_secs_f64() * jitter.clamp(0.0, 1.0);
    let offset = rand::thread_rng().gen_range(-range..=range);
    Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
}

/// `std` duration to a `chrono` offset, saturating instead of failing.
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX / 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter,
        }
    }

    #[test]
    fn doubles_then_caps() {
        let p = policy(0.0);
        assert_eq!(p.next_delay(1), Duration::from_secs(5));
        assert_eq!(p.next_delay(2), Duration::from_secs(10));
        assert_eq!(p.next_delay(3), Duration::from_secs(20));
        assert_eq!(p.next_delay(4), Duration::from_secs(40));
        assert_eq!(p.next_delay(5), Duration::from_secs(60));
        assert_eq!(p.next_delay(40), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_band() {
        let p = policy(0.1);
        for _ in 0..200 {
            let d = p.next_delay(2);
            assert!(d >= Duration::from_secs(9) && d <= Duration::from_secs(11), "{d:?}");
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let p = policy(1.0);
        for _ in 0..200 {
            assert!(p.next_delay(10) <= Duration::from_secs(60));
        }
    }
}
