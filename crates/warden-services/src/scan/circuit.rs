//! Per-detector circuit breaker on the shared counter store.
//!
//! The breaker is a consecutive-failure counter with a TTL. It opens once the counter
//! reaches the threshold and closes again on the next success or when the counter decays.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use warden_core::ScanSettings;
use warden_db::{CounterStore, StoreResult};

const KEY_PREFIX: &str = "warden:circuit:";

pub struct CircuitBreaker {
    counters: Arc<dyn CounterStore>,
    threshold: u64,
    decay: Duration,
    /// Serialises read-modify-write when the store has no atomic increment.
    update_lock: Mutex<()>,
}

impl CircuitBreaker {
    pub fn new(counters: Arc<dyn CounterStore>, threshold: u64, decay: Duration) -> Self {
        Self {
            counters,
            threshold: threshold.max(1),
            decay,
            update_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(counters: Arc<dyn CounterStore>, settings: &ScanSettings) -> Self {
        Self::new(counters, settings.circuit_threshold, settings.circuit_decay)
    }

    fn key(detector: &str) -> String {
        format!("{}{}", KEY_PREFIX, detector)
    }

    /// Consecutive failures currently counted for `detector`.
    pub async fn failures(&self, detector: &str) -> StoreResult<u64> {
        let value = self.counters.get(&Self::key(detector)).await?;
        Ok(value.unwrap_or(0).max(0) as u64)
    }

    pub async fn is_open(&self, detector: &str) -> StoreResult<bool> {
        Ok(self.failures(detector).await? >= self.threshold)
    }

    /// Count one infrastructure failure and refresh the decay window.
    pub async fn record_failure(&self, detector: &str) -> StoreResult<u64> {
        let key = Self::key(detector);
        let count = if self.counters.supports_atomic_increment() {
            self.counters.increment(&key, self.decay).await?
        } else {
            let _guard = self.update_lock.lock().await;
            let next = self.counters.get(&key).await?.unwrap_or(0) + 1;
            self.counters.set(&key, next, self.decay).await?;
            next
        };

        let count = count.max(0) as u64;
        if count == self.threshold {
            tracing::warn!(
                detector = %detector,
                failures = count,
                decay_secs = self.decay.as_secs(),
                "Detector circuit opened"
            );
        }
        Ok(count)
    }

    /// Close the breaker.
    pub async fn record_success(&self, detector: &str) -> StoreResult<()> {
        self.counters.delete(&Self::key(detector)).await
    }
}
