//! Security event sinks
//!
//! [`TracingEventSink`] writes events as structured tracing records. [`DedupEventSink`]
//! wraps any sink and drops repeats of an identical event inside a time window, which is
//! how noisy conditions (an unreachable detector, a missing rule file) are reported once
//! instead of on every upload.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use warden_core::{EventSink, LogLevel, SecurityEvent};

/// Emits every event through `tracing` with the context map as a JSON field.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SecurityEvent) {
        let context = serde_json::to_string(&event.context).unwrap_or_default();
        match event.level {
            LogLevel::Debug => tracing::debug!(
                event = event.name,
                correlation_id = %event.correlation_id,
                context = %context,
                "security event"
            ),
            LogLevel::Info => tracing::info!(
                event = event.name,
                correlation_id = %event.correlation_id,
                context = %context,
                "security event"
            ),
            LogLevel::Warn => tracing::warn!(
                event = event.name,
                correlation_id = %event.correlation_id,
                context = %context,
                "security event"
            ),
            LogLevel::Error => tracing::error!(
                event = event.name,
                correlation_id = %event.correlation_id,
                context = %context,
                "security event"
            ),
        }
    }
}

/// Forwards an event only if the same fingerprint was not seen within `window`.
pub struct DedupEventSink {
    inner: Arc<dyn EventSink>,
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupEventSink {
    pub fn new(inner: Arc<dyn EventSink>, window: Duration) -> Self {
        Self {
            inner,
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    fn should_emit(&self, fingerprint: String) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.retain(|_, at| now.duration_since(*at) < self.window);
        if seen.contains_key(&fingerprint) {
            return false;
        }
        seen.insert(fingerprint, now);
        true
    }
}

impl EventSink for DedupEventSink {
    fn emit(&self, event: SecurityEvent) {
        if self.should_emit(event.fingerprint()) {
            self.inner.emit(event);
        }
    }
}

/// Keeps every event in memory. Used by hosts' tests and the pipeline's integration tests.
#[derive(Default)]
pub struct CapturingEventSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl CapturingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.name == name)
            .count()
    }
}

impl EventSink for CapturingEventSink {
    fn emit(&self, event: SecurityEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
