//! Directory-backed key-value store.
//!
//! One file per key. Writes go to a temporary sibling and are renamed into
//! place, so readers in other processes never see a partial value.
//!
//! Change notifications cover writes made through this instance only.
//! Lock waiters in other processes fall back to polling.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::ports::{KeyValueStore, StorageChange, StoreError};

use super::CHANGE_CAPACITY;

/// Key-value store persisted under a directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    changes: broadcast::Sender<StorageChange>,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        tracing::debug!(dir = %dir.display(), "Opened file store");
        Ok(Self { dir, changes })
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }

    fn notify(&self, key: &str, value: Option<String>) {
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            value,
        });
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.notify(key, None);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn changes(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
