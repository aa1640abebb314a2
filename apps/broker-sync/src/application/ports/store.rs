//! Shared Key-Value Store Port
//!
//! Every process of the same user profile sees the same store. It holds
//! the cached session, saved credentials and the sync lock record. Writes
//! are last-writer-wins; the store provides no locking of its own.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

/// A change observed on the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// Key that changed.
    pub key: String,
    /// New value, `None` when the key was removed.
    pub value: Option<String>,
}

/// Errors raised by store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying I/O failed.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be (de)serialized.
    #[error("store value for {key} is malformed: {source}")]
    Malformed {
        /// Key holding the bad value.
        key: String,
        /// Serde error.
        source: serde_json::Error,
    },

    /// Key contains characters the adapter cannot store.
    #[error("invalid store key: {0}")]
    InvalidKey(String),
}

/// String-valued shared key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Subscribe to change notifications.
    fn changes(&self) -> broadcast::Receiver<StorageChange>;
}

/// Read and decode a JSON value.
///
/// # Errors
///
/// Returns [`StoreError::Malformed`] when the stored text is not valid JSON
/// for `T`, or the adapter's error when the read fails.
pub async fn read_json<T>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
{
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Malformed {
            key: key.to_string(),
            source,
        })
}

/// Encode and write a JSON value.
///
/// # Errors
///
/// Returns the adapter's error when the write fails.
pub async fn write_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), StoreError>
where
    T: Serialize + Sync + ?Sized,
{
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw).await
}
