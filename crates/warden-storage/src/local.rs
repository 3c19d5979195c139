use crate::traits::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    disk: String,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory of this disk (e.g., "/var/lib/warden/storage/local")
    /// * `disk` - Disk identifier profiles refer to
    pub async fn new(base_path: impl Into<PathBuf>, disk: impl Into<String>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path)
            .await
            .map_err(|source| StorageError::Root {
                path: base_path.display().to_string(),
                source,
            })?;

        Ok(LocalStorage {
            base_path,
            disk: disk.into(),
        })
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Rejects keys containing traversal sequences that could escape the base directory.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty()
            || storage_key.contains("..")
            || storage_key.starts_with('/')
            || storage_key.contains('\\')
            || storage_key.contains('\0')
        {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let path = self.base_path.join(storage_key);

        let base_canonical =
            self.base_path
                .canonicalize()
                .map_err(|source| StorageError::Root {
                    path: self.base_path.display().to_string(),
                    source,
                })?;

        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Sibling path the object is written to before the final rename.
    fn partial_path(path: &Path) -> PathBuf {
        let suffix: u32 = rand::rng().random();
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".partial-{:08x}", suffix));
        path.with_file_name(name)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put_file(&self, storage_key: &str, source: &Path) -> StorageResult<u64> {
        let path = self.key_to_path(storage_key)?;
        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();
        let partial = Self::partial_path(&path);

        let copied = match fs::copy(source, &partial).await {
            Ok(n) => n,
            Err(source) => {
                let _ = fs::remove_file(&partial).await;
                return Err(StorageError::Write {
                    key: storage_key.to_string(),
                    source,
                });
            }
        };

        let finalized = async {
            let file = fs::OpenOptions::new().write(true).open(&partial).await?;
            file.sync_all().await?;
            fs::rename(&partial, &path).await
        }
        .await;
        if let Err(source) = finalized {
            let _ = fs::remove_file(&partial).await;
            return Err(StorageError::Write {
                key: storage_key.to_string(),
                source,
            });
        }

        tracing::info!(
            disk = %self.disk,
            key = %storage_key,
            size_bytes = copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put successful"
        );

        Ok(copied)
    }

    async fn put_bytes(&self, storage_key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;
        self.ensure_parent_dir(&path).await?;

        let written = async {
            let mut file = fs::File::create(&path).await?;
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;
        written.map_err(|source| StorageError::Write {
            key: storage_key.to_string(),
            source,
        })?;

        tracing::debug!(
            disk = %self.disk,
            key = %storage_key,
            size_bytes = data.len(),
            "Local storage put_bytes successful"
        );

        Ok(())
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;
        let start = std::time::Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(StorageError::Delete {
                    key: storage_key.to_string(),
                    source,
                })
            }
        }

        tracing::info!(
            disk = %self.disk,
            key = %storage_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(storage_key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    fn disk(&self) -> &str {
        &self.disk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_file_is_atomic() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("disk"), "local").await.unwrap();

        let source = dir.path().join("source.bin");
        std::fs::write(&source, b"test data").unwrap();

        let key = "tenants/t1/users/u1/avatars/2026/10/a.png";
        let written = storage.put_file(key, &source).await.unwrap();
        assert_eq!(written, 9);

        assert!(storage.exists(key).await.unwrap());
        assert_eq!(
            std::fs::read(dir.path().join("disk").join(key)).unwrap(),
            b"test data"
        );

        let leftovers: Vec<_> = std::fs::read_dir(
            dir.path().join("disk/tenants/t1/users/u1/avatars/2026/10"),
        )
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".partial-"))
        .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "local").await.unwrap();

        let result = storage.put_bytes("../../../etc/passwd", b"x").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_delete_nonexistent_is_ok() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "local").await.unwrap();

        assert!(storage.delete("nonexistent/file.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_exists() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "local").await.unwrap();

        storage.put_bytes("a/b/exists.txt", b"test").await.unwrap();

        assert!(storage.exists("a/b/exists.txt").await.unwrap());
        assert!(!storage.exists("nonexistent.txt").await.unwrap());
        assert_eq!(storage.disk(), "local");
    }

    #[tokio::test]
    async fn test_put_file_missing_source() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "local").await.unwrap();

        let result = storage
            .put_file("a/missing.bin", &dir.path().join("nope"))
            .await;
        match result {
            Err(StorageError::Write { key, source }) => {
                assert_eq!(key, "a/missing.bin");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected write error, got {:?}", other.map(|_| ())),
        }
        assert!(!storage.exists("a/missing.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_failure_names_the_key() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "local").await.unwrap();
        std::fs::create_dir_all(dir.path().join("a/dir.bin")).unwrap();

        let err = storage.delete("a/dir.bin").await.unwrap_err();
        assert!(matches!(err, StorageError::Delete { ref key, .. } if key == "a/dir.bin"));
        assert!(err.to_string().starts_with("deleting a/dir.bin failed"));
    }
}
