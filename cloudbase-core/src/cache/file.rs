//! File-backed storage for `local` persistence.
//!
//! Entries are kept in memory for synchronous reads and written through to a
//! JSON file on every change.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{Secret, StorageBackend, StoreError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileStorageData {
    version: u32,
    entries: BTreeMap<String, Secret>,
}

/// Durable storage in a JSON file.
pub struct FileStorage {
    path: PathBuf,
    data: RwLock<FileStorageData>,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Default location of the storage file.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "cloudbase", "cloudbase")
            .map(|dirs| dirs.data_dir().join("credentials.json"))
    }

    /// Load the storage from a specific path.
    ///
    /// Creates parent directories if they don't exist; a missing file starts
    /// empty.
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            FileStorageData {
                version: 1,
                entries: BTreeMap::new(),
            }
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let contents = {
            let data = self.data.read();
            serde_json::to_string_pretty(&*data)?
        };
        tokio::fs::write(&self.path, contents).await?;
        restrict_permissions(&self.path)?;
        Ok(())
    }

    fn persist_blocking(&self) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(&*self.data.read())?;
        fs::write(&self.path, contents)?;
        restrict_permissions(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .field("keys_count", &self.data.read().entries.len())
            .finish()
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().entries.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        self.data
            .write()
            .entries
            .insert(key.to_string(), value.clone());
        self.persist().await
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.data.write().entries.remove(key);
        if removed.is_some() {
            self.persist_blocking()?;
        }
        Ok(())
    }
}
