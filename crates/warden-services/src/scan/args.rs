//! Allow-listed subprocess arguments.
//!
//! Detector command lines are assembled only from these variants. Integer options are
//! clamped and the scan target is always a path the pipeline created itself.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

const MAX_CLAMSCAN_BYTES: u64 = 4 * 1024 * 1024 * 1024 - 1;
const MAX_YARA_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanArg {
    /// clamscan `--no-summary`
    NoSummary,
    /// clamscan `--infected`
    InfectedOnly,
    /// clamscan `--stdout`
    Stdout,
    /// clamscan `--max-filesize=N`
    MaxFileSize(u64),
    /// clamscan `--max-scansize=N`
    MaxScanSize(u64),
    /// yara `--fast-scan`
    FastScan,
    /// yara `--no-warnings`
    NoWarnings,
    /// yara `--timeout=N` in seconds
    Timeout(u64),
    /// yara `-C`: rules are precompiled
    CompiledRules,
}

impl ScanArg {
    pub fn render(&self) -> OsString {
        let rendered = match self {
            ScanArg::NoSummary => "--no-summary".to_string(),
            ScanArg::InfectedOnly => "--infected".to_string(),
            ScanArg::Stdout => "--stdout".to_string(),
            ScanArg::MaxFileSize(n) => format!("--max-filesize={}", (*n).clamp(1, MAX_CLAMSCAN_BYTES)),
            ScanArg::MaxScanSize(n) => format!("--max-scansize={}", (*n).clamp(1, MAX_CLAMSCAN_BYTES)),
            ScanArg::FastScan => "--fast-scan".to_string(),
            ScanArg::NoWarnings => "--no-warnings".to_string(),
            ScanArg::Timeout(secs) => format!("--timeout={}", (*secs).clamp(1, MAX_YARA_TIMEOUT_SECS)),
            ScanArg::CompiledRules => "-C".to_string(),
        };
        OsString::from(rendered)
    }
}

/// Full argument vector for one detector invocation.
#[derive(Debug, Clone)]
pub struct ScanCommand {
    pub flags: Vec<ScanArg>,
    /// Rule file, placed before the target (yara).
    pub rules: Option<PathBuf>,
    pub target: PathBuf,
}

impl ScanCommand {
    pub fn new(flags: Vec<ScanArg>, target: &Path) -> Self {
        Self {
            flags,
            rules: None,
            target: target.to_path_buf(),
        }
    }

    pub fn with_rules(mut self, rules: &Path) -> Self {
        self.rules = Some(rules.to_path_buf());
        self
    }

    /// Flags, then rules, then target. Both paths are absolute so neither reads as an option.
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv: Vec<OsString> = self.flags.iter().map(ScanArg::render).collect();
        if let Some(rules) = &self.rules {
            argv.push(rules.as_os_str().to_os_string());
        }
        argv.push(self.target.as_os_str().to_os_string());
        argv
    }
}
