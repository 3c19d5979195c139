use crate::{LocalStorage, Storage, StorageError, StorageResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Named storage disks, selected per upload by `UploadProfile::disk`.
#[derive(Clone, Default)]
pub struct StorageDisks {
    disks: HashMap<String, Arc<dyn Storage>>,
}

impl StorageDisks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disk(mut self, storage: Arc<dyn Storage>) -> Self {
        self.disks.insert(storage.disk().to_string(), storage);
        self
    }

    pub fn get(&self, disk: &str) -> StorageResult<Arc<dyn Storage>> {
        self.disks
            .get(disk)
            .cloned()
            .ok_or_else(|| StorageError::UnknownDisk(disk.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.disks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Create one local disk per name, each rooted at `root/{name}`.
pub async fn create_disks<'a>(
    root: &Path,
    names: impl IntoIterator<Item = &'a str>,
) -> StorageResult<StorageDisks> {
    let mut disks = StorageDisks::new();
    for name in names {
        if disks.disks.contains_key(name) {
            continue;
        }
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
            return Err(StorageError::InvalidDiskName(name.to_string()));
        }
        let storage = LocalStorage::new(root.join(name), name).await?;
        disks = disks.with_disk(Arc::new(storage));
    }
    Ok(disks)
}
