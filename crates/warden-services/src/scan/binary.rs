//! Resolution of detector binaries against an allow-list of canonical paths.

use std::path::{Path, PathBuf};

use super::detector::DetectorError;

/// Read-only set of binaries detectors may execute.
#[derive(Debug, Clone, Default)]
pub struct BinaryAllowList {
    allowed: Vec<PathBuf>,
}

impl BinaryAllowList {
    /// Canonicalise every configured entry. Entries that do not exist are dropped.
    pub fn new(paths: &[PathBuf]) -> Self {
        let allowed = paths
            .iter()
            .filter_map(|p| match std::fs::canonicalize(p) {
                Ok(canonical) => Some(canonical),
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "Allow-listed binary not found");
                    None
                }
            })
            .collect();
        Self { allowed }
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Resolve `binary` (a bare name looked up on `PATH`, or a path) to a canonical,
    /// executable, allow-listed file.
    pub fn resolve(&self, binary: &str) -> Result<PathBuf, DetectorError> {
        let candidate = if binary.contains(std::path::MAIN_SEPARATOR) || binary.contains('/') {
            PathBuf::from(binary)
        } else {
            search_path(binary).ok_or_else(|| DetectorError::MissingBinary(binary.to_string()))?
        };

        let canonical = std::fs::canonicalize(&candidate)
            .map_err(|_| DetectorError::MissingBinary(binary.to_string()))?;
        if !is_executable_file(&canonical) {
            return Err(DetectorError::MissingBinary(binary.to_string()));
        }
        if !self.allowed.contains(&canonical) {
            return Err(DetectorError::NotAllowListed(canonical.display().to_string()));
        }
        Ok(canonical)
    }
}

fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable_file(candidate))
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
