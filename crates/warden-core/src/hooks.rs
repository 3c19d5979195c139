//! Hooks for host integration
//!
//! The pipeline reports security-relevant events through [`EventSink`] instead of writing
//! to a global logger, so hosts can route them to an audit trail and tests can capture them.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::LogLevel;

/// A structured, non-PII event emitted by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityEvent {
    pub name: &'static str,
    pub level: LogLevel,
    pub correlation_id: String,
    pub context: BTreeMap<String, Value>,
}

impl SecurityEvent {
    pub fn new(name: &'static str, level: LogLevel, correlation_id: impl Into<String>) -> Self {
        Self {
            name,
            level,
            correlation_id: correlation_id.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Key used to recognise repeats of the same event.
    pub fn fingerprint(&self) -> String {
        let context = serde_json::to_string(&self.context).unwrap_or_default();
        format!("{}|{}", self.name, context)
    }
}

/// Destination for structured (event-name, context-map) pairs.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SecurityEvent);
}

/// Sink that drops everything.
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: SecurityEvent) {}
}

/// Short, stable digest of a client-supplied value (file names) that is safe to log.
pub fn hash_for_log(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..8])
}
