//! Heartbeat back-off after consecutive directory failures.
//!
//! Formula: `min(interval * 2^failures, max) * (1 + random * jitter)`, clamped
//! to `max`. With no failures the plain interval is used, without jitter.

use rand::Rng;
use std::time::Duration;

/// Back-off parameters for the liveness loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Upper bound on any delay.
    pub max: Duration,
    /// Jitter factor (0.0 = no jitter, 1.0 = up to double).
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max: Duration::from_secs(300),
            jitter: 0.1,
        }
    }
}

impl Backoff {
    /// Delay before the next heartbeat after `failures` consecutive failures.
    pub fn delay(&self, interval: Duration, failures: u32) -> Duration {
        if failures == 0 {
            return interval;
        }
        let base_ms = interval.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = self.max.as_millis().min(u64::MAX as u128) as u64;
        let factor = 1u64.checked_shl(failures).unwrap_or(u64::MAX);
        let capped = base_ms.saturating_mul(factor).min(max_ms);

        if self.jitter <= 0.0 {
            return Duration::from_millis(capped);
        }
        let frac: f64 = rand::thread_rng().gen();
        let with_jitter = (capped as f64) * (1.0 + frac * self.jitter);
        Duration::from_millis((with_jitter as u64).min(max_ms))
    }
}
