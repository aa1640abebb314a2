//! Cross-Process Sync Lock
//!
//! Elects one process as sync leader through an advisory record in the
//! shared store. Acquisition writes the record and reads it back to check
//! ownership; a same-millisecond race between two writers can still let
//! both proceed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Clock, KeyValueStore, StoreError, read_json, write_json};
use crate::domain::lock::{LOCK_TIMEOUT, SyncLockRecord, can_acquire};

/// Key holding the lock record.
pub const SYNC_LOCK_KEY: &str = "broker-sync.sync-lock";

/// Upper bound between lock re-checks while waiting.
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Acquires and releases the shared sync lock for one process.
pub struct SyncLockManager {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    tab_id: String,
    timeout: Duration,
}

impl SyncLockManager {
    /// Create a lock manager identified by `tab_id`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, tab_id: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            tab_id: tab_id.into(),
            timeout: LOCK_TIMEOUT,
        }
    }

    /// Override the reclaim timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Identity written into the lock record.
    #[must_use]
    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Current lock record. A malformed record reads as absent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read.
    pub async fn current(&self) -> Result<Option<SyncLockRecord>, StoreError> {
        match read_json(self.store.as_ref(), SYNC_LOCK_KEY).await {
            Ok(record) => Ok(record),
            Err(StoreError::Malformed { source, .. }) => {
                tracing::warn!(error = %source, "Ignoring malformed sync lock record");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Try to take or refresh the lock.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn try_acquire(&self) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let current = self.current().await?;

        if !can_acquire(current.as_ref(), &self.tab_id, now, self.timeout) {
            tracing::debug!(
                holder = current.as_ref().map_or("", |r| r.tab_id.as_str()),
                "Sync lock held elsewhere"
            );
            return Ok(false);
        }

        if let Some(stale) = current.as_ref().filter(|r| r.tab_id != self.tab_id) {
            tracing::info!(previous = %stale.tab_id, "Reclaiming expired sync lock");
        }

        let record = SyncLockRecord::new(self.tab_id.clone(), now);
        write_json(self.store.as_ref(), SYNC_LOCK_KEY, &record).await?;

        let owned = self
            .current()
            .await?
            .is_some_and(|r| r.tab_id == self.tab_id);
        if owned {
            tracing::debug!(tab_id = %self.tab_id, "Sync lock acquired");
        } else {
            tracing::debug!(tab_id = %self.tab_id, "Lost sync lock race");
        }
        Ok(owned)
    }

    /// Remove the lock if this process holds it. Returns whether it did.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn release(&self) -> Result<bool, StoreError> {
        let owned = self
            .current()
            .await?
            .is_some_and(|r| r.tab_id == self.tab_id);
        if owned {
            self.store.remove(SYNC_LOCK_KEY).await?;
            tracing::debug!(tab_id = %self.tab_id, "Sync lock released");
        }
        Ok(owned)
    }

    /// Wait until the lock looks acquirable or `cancel` fires.
    ///
    /// Wakes on any change to the lock key, when the holder's record
    /// expires, and at least every thirty seconds. Returns `false` when
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read.
    pub async fn wait_for_release(&self, cancel: &CancellationToken) -> Result<bool, StoreError> {
        let mut changes = self.store.changes();

        loop {
            let now = self.clock.now();
            let current = self.current().await?;
            if can_acquire(current.as_ref(), &self.tab_id, now, self.timeout) {
                return Ok(true);
            }

            let until_expiry = current
                .as_ref()
                .map_or(Duration::ZERO, |r| {
                    let age = (now - r.timestamp).to_std().unwrap_or(Duration::ZERO);
                    self.timeout.saturating_sub(age)
                });
            let wake_after = until_expiry.min(WAIT_POLL_INTERVAL);

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(false),
                () = tokio::time::sleep(wake_after) => {}
                change = changes.recv() => match change {
                    Ok(change) if change.key != SYNC_LOCK_KEY => {}
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        tracing::debug!("Sync lock changed");
                    }
                    Err(RecvError::Closed) => {
                        tokio::time::sleep(wake_after).await;
                    }
                },
            }
        }
    }
}

impl std::fmt::Debug for SyncLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLockManager")
            .field("tab_id", &self.tab_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
