//! Quarantine area
//!
//! Untrusted bytes are staged here before any other stage sees them. The directory is
//! private to the process user (`0700`), staged files are `0600`, and file names are
//! random so nothing the client sends ever reaches the filesystem.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use warden_core::{hash_for_log, RejectReason, UploadError};

const NAME_BYTES: usize = 16;

#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("Upload exceeds {max} bytes")]
    TooLarge { max: u64 },

    #[error("Staged size mismatch: copied {copied}, on disk {on_disk}, expected {expected:?}")]
    SizeMismatch {
        copied: u64,
        on_disk: u64,
        expected: Option<u64>,
    },

    #[error("Quarantine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<QuarantineError> for UploadError {
    fn from(err: QuarantineError) -> Self {
        match err {
            QuarantineError::TooLarge { max } => UploadError::Rejected(RejectReason::FileTooLarge {
                size: max.saturating_add(1),
                max,
            }),
            other => UploadError::Quarantine(other.to_string()),
        }
    }
}

/// Handle to one staged file. Owned by the request that staged it.
#[derive(Debug)]
pub struct QuarantineToken {
    path: PathBuf,
    correlation_id: String,
    category: String,
    created_at: DateTime<Utc>,
    len: u64,
}

impl QuarantineToken {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone)]
pub struct QuarantineStore {
    root: PathBuf,
}

impl QuarantineStore {
    /// Create (or tighten) the quarantine directory.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, QuarantineError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        restrict_permissions(&root, 0o700).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `reader` into a fresh quarantine file.
    ///
    /// Reads at most `max_len + 1` bytes. The staged file is removed on every error path.
    #[tracing::instrument(skip(self, reader, declared_name), fields(name_hash = %hash_for_log(declared_name)))]
    pub async fn stage<R>(
        &self,
        reader: R,
        declared_name: &str,
        correlation_id: &str,
        category: &str,
        expected_len: Option<u64>,
        max_len: u64,
    ) -> Result<QuarantineToken, QuarantineError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let path = self.root.join(random_name());
        let mut file = open_private(&path).await?;

        let result = async {
            let mut limited = reader.take(max_len.saturating_add(1));
            let copied = tokio::io::copy(&mut limited, &mut file).await?;
            if copied > max_len {
                return Err(QuarantineError::TooLarge { max: max_len });
            }
            file.flush().await?;
            file.sync_all().await?;

            let on_disk = fs::metadata(&path).await?.len();
            let expected_ok = expected_len.map_or(true, |e| e == copied);
            if on_disk != copied || !expected_ok {
                return Err(QuarantineError::SizeMismatch {
                    copied,
                    on_disk,
                    expected: expected_len,
                });
            }
            Ok(copied)
        }
        .await;
        drop(file);

        match result {
            Ok(len) => {
                tracing::debug!(correlation_id = %correlation_id, size_bytes = len, "File staged in quarantine");
                Ok(QuarantineToken {
                    path,
                    correlation_id: correlation_id.to_string(),
                    category: category.to_string(),
                    created_at: Utc::now(),
                    len,
                })
            }
            Err(e) => {
                if let Err(remove_err) = remove_if_present(&path).await {
                    tracing::error!(error = %remove_err, "Failed to remove rejected quarantine file");
                }
                tracing::warn!(correlation_id = %correlation_id, error = %e, "Quarantine staging failed");
                Err(e)
            }
        }
    }

    /// Delete the staged file. Releasing twice is not an error.
    pub async fn release(&self, token: &QuarantineToken) -> Result<(), QuarantineError> {
        remove_if_present(&token.path).await?;
        tracing::debug!(correlation_id = %token.correlation_id, "Quarantine file released");
        Ok(())
    }

    /// Wrap a token so it is released on every exit path.
    pub fn guard(&self, token: QuarantineToken) -> QuarantineGuard {
        QuarantineGuard {
            token,
            released: false,
        }
    }

    /// Remove staged files older than `max_age` left behind by a crashed process.
    pub async fn purge_stale(&self, max_age: Duration) -> Result<usize, QuarantineError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut purged = 0;
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_staged_name(name) {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !meta.is_file() {
                continue;
            }
            if meta.modified().map(|m| m < cutoff).unwrap_or(false) {
                remove_if_present(&entry.path()).await?;
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::info!(purged = purged, "Purged stale quarantine files");
        }
        Ok(purged)
    }
}

/// Releases its token exactly once: explicitly through [`QuarantineGuard::release`], or in
/// `Drop` when the owning future returns early, is cancelled or panics.
#[derive(Debug)]
pub struct QuarantineGuard {
    token: QuarantineToken,
    released: bool,
}

impl QuarantineGuard {
    pub fn token(&self) -> &QuarantineToken {
        &self.token
    }

    pub fn path(&self) -> &Path {
        self.token.path()
    }

    pub async fn release(mut self) -> Result<(), QuarantineError> {
        remove_if_present(&self.token.path).await?;
        self.released = true;
        tracing::debug!(correlation_id = %self.token.correlation_id, "Quarantine file released");
        Ok(())
    }
}

impl Drop for QuarantineGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.token.path) {
            Ok(()) => tracing::debug!(
                correlation_id = %self.token.correlation_id,
                "Quarantine file released on drop"
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::error!(
                correlation_id = %self.token.correlation_id,
                error = %e,
                "Failed to release quarantine file on drop"
            ),
        }
    }
}

fn random_name() -> String {
    let mut bytes = [0u8; NAME_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

fn is_staged_name(name: &str) -> bool {
    name.len() == NAME_BYTES * 2 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(unix)]
async fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await
}

#[cfg(not(unix))]
async fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
