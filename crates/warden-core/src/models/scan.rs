use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Outcome of running every configured detector against one artifact.
///
/// Only [`ScanVerdict::Clean`] permits promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "detail", rename_all = "snake_case")]
pub enum ScanVerdict {
    Clean,
    /// Carries the name of the detector that flagged the file.
    Infected(String),
    Unavailable(String),
    ValidationFailed(String),
}

impl ScanVerdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, ScanVerdict::Clean)
    }
}

/// Lifecycle of a single scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    NotStarted,
    Running,
    Clean,
    Infected,
    InfraFailure,
    ValidationFailure,
}

impl ScanPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanPhase::NotStarted | ScanPhase::Running)
    }
}

/// Supported detector implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// clamd daemon, file streamed over INSTREAM.
    Clamd,
    /// One-shot `clamscan` binary against a private copy.
    Clamscan,
    /// One-shot `yara` binary with a compiled or source rule set.
    Yara,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clamd" | "clamav" => Ok(DetectorKind::Clamd),
            "clamscan" => Ok(DetectorKind::Clamscan),
            "yara" => Ok(DetectorKind::Yara),
            other => Err(anyhow::anyhow!("Invalid detector kind: {}", other)),
        }
    }
}

impl Display for DetectorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DetectorKind::Clamd => write!(f, "clamd"),
            DetectorKind::Clamscan => write!(f, "clamscan"),
            DetectorKind::Yara => write!(f, "yara"),
        }
    }
}
