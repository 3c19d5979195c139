use rand::Rng;
use std::time::Duration;
use warden_core::ScanSettings;

/// Bounded exponential backoff with random jitter for transient detector errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per detector, including the first. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter as a percentage of the computed delay (0-100).
    pub jitter_pct: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter_pct: 20,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &ScanSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.backoff_base,
            max_delay: settings.backoff_max,
            ..Self::default()
        }
    }

    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_pct: 0,
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// [`RetryPolicy::backoff`] plus up to `jitter_pct` percent of random jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        let jitter_pct = u32::from(self.jitter_pct.min(100));
        if jitter_pct == 0 || delay.is_zero() {
            return delay;
        }
        let max_jitter = delay.as_millis() as u64 * u64::from(jitter_pct) / 100;
        let jitter = rand::rng().random_range(0..=max_jitter);
        delay + Duration::from_millis(jitter)
    }
}
