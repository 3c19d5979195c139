use async_trait::async_trait;
use std::path::Path;
use warden_core::models::DetectorKind;

/// Why a detector could not produce a verdict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectorError {
    #[error("detector timed out after {0} ms")]
    Timeout(u64),

    #[error("detector unreachable: {0}")]
    Connection(String),

    #[error("detector binary not found: {0}")]
    MissingBinary(String),

    #[error("detector binary is not allow-listed: {0}")]
    NotAllowListed(String),

    #[error("rule set unavailable: {0}")]
    RulesUnavailable(String),

    #[error("detector rejected the target: {0}")]
    MalformedTarget(String),

    #[error("detector failed: {0}")]
    Failed(String),
}

impl DetectorError {
    /// Timeouts and connection failures may succeed on retry; everything else will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, DetectorError::Timeout(_) | DetectorError::Connection(_))
    }
}

/// Result of one successful detector run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorOutcome {
    Clean,
    /// Signature or rule name reported by the detector.
    Infected(String),
}

/// Health probe of a single detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorProbe {
    pub reachable: bool,
    pub allow_listed: bool,
    /// Operator-facing detail. May contain paths; never returned to clients.
    pub detail: Option<String>,
}

/// An external malware or pattern scanner.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Stable name used for breaker keys and events.
    fn name(&self) -> &str;

    fn kind(&self) -> DetectorKind;

    async fn scan(&self, path: &Path) -> Result<DetectorOutcome, DetectorError>;

    async fn probe(&self) -> DetectorProbe;
}
