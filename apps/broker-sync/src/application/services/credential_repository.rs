//! Credential Repository
//!
//! Saved credential sets live under one shared key as a JSON array. Saving
//! a set whose identity already exists merges into the existing record.
//! Sync attempt times live under a second key so every process sharing the
//! store honors the same cool-down.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::application::ports::{KeyValueStore, StoreError, read_json, write_json};
use crate::domain::credentials::{CredentialId, CredentialSet, dedupe};

/// Key holding the saved credential sets.
pub const CREDENTIALS_KEY: &str = "broker-sync.credentials";

/// Key holding the last sync attempt time per set.
pub const SYNC_ATTEMPTS_KEY: &str = "broker-sync.sync-attempts";

type AttemptMap = BTreeMap<CredentialId, DateTime<Utc>>;

/// Persistent credential sets.
#[derive(Clone)]
pub struct CredentialRepository {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialRepository {
    /// Create a repository over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Every saved set, duplicates collapsed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or holds bad JSON.
    pub async fn load_all(&self) -> Result<Vec<CredentialSet>, StoreError> {
        let sets: Vec<CredentialSet> = read_json(self.store.as_ref(), CREDENTIALS_KEY)
            .await?
            .unwrap_or_default();
        Ok(dedupe(sets))
    }

    /// One saved set.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read.
    pub async fn get(&self, id: &CredentialId) -> Result<Option<CredentialSet>, StoreError> {
        Ok(self.load_all().await?.into_iter().find(|s| &s.id == id))
    }

    /// Save `set`, merging with an existing record of the same identity.
    ///
    /// Returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn save(&self, set: CredentialSet) -> Result<CredentialSet, StoreError> {
        let mut sets = self.load_all().await?;

        let stored = if let Some(existing) = sets.iter_mut().find(|s| s.id == set.id) {
            existing.merge(set);
            existing.clone()
        } else {
            sets.push(set.clone());
            set
        };

        self.write_all(&sets).await?;
        tracing::debug!(credential = %stored.id, "Saved credential set");
        Ok(stored)
    }

    /// Delete a set. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn remove(&self, id: &CredentialId) -> Result<bool, StoreError> {
        let mut sets = self.load_all().await?;
        let before = sets.len();
        sets.retain(|s| &s.id != id);

        if sets.len() == before {
            return Ok(false);
        }
        self.write_all(&sets).await?;
        self.clear_attempt(id).await?;
        Ok(true)
    }

    /// Record the start of a sync attempt.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn record_attempt(&self, id: &CredentialId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut attempts = self.attempts().await?;
        attempts.insert(id.clone(), at);
        write_json(self.store.as_ref(), SYNC_ATTEMPTS_KEY, &attempts).await
    }

    /// Forget the last attempt of a set so it may run at once.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn clear_attempt(&self, id: &CredentialId) -> Result<(), StoreError> {
        let mut attempts = self.attempts().await?;
        if attempts.remove(id).is_some() {
            write_json(self.store.as_ref(), SYNC_ATTEMPTS_KEY, &attempts).await?;
        }
        Ok(())
    }

    /// Last attempt time of every set that has one.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or holds bad JSON.
    pub async fn attempts(&self) -> Result<AttemptMap, StoreError> {
        Ok(read_json(self.store.as_ref(), SYNC_ATTEMPTS_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Record a successful sync. The stored time only moves forward.
    ///
    /// Returns whether the set exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn record_sync(&self, id: &CredentialId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.update(id, |set| {
            set.last_sync_time = Some(set.last_sync_time.map_or(at, |prev| prev.max(at)));
        })
        .await
    }

    /// Replace the account selection of a set.
    ///
    /// Returns whether the set exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn update_selection<I, S>(
        &self,
        id: &CredentialId,
        accounts: I,
        all_accounts: bool,
    ) -> Result<bool, StoreError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        let accounts: Vec<String> = accounts.into_iter().map(Into::into).collect();
        self.update(id, move |set| {
            set.selected_account_ids = accounts.into_iter().collect();
            set.all_accounts = all_accounts;
        })
        .await
    }

    async fn update<F>(&self, id: &CredentialId, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut CredentialSet) + Send,
    {
        let mut sets = self.load_all().await?;
        let Some(set) = sets.iter_mut().find(|s| &s.id == id) else {
            return Ok(false);
        };
        apply(set);
        self.write_all(&sets).await?;
        Ok(true)
    }

    async fn write_all(&self, sets: &[CredentialSet]) -> Result<(), StoreError> {
        write_json(self.store.as_ref(), CREDENTIALS_KEY, sets).await
    }
}

impl std::fmt::Debug for CredentialRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRepository").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credentials::CredentialFields;
    use crate::infrastructure::storage::MemoryStore;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, hour, 0, 0).unwrap()
    }

    fn repo() -> CredentialRepository {
        CredentialRepository::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn saving_same_identity_merges() {
        let repo = repo();
        repo.save(
            CredentialSet::new(CredentialFields::new("Trader01", "pw"))
                .with_accounts(["ACC1"])
                .with_last_sync(at(9)),
        )
        .await
        .unwrap();
        repo.save(
            CredentialSet::new(CredentialFields::new(" trader01 ", "pw2"))
                .with_accounts(["ACC2"])
                .with_last_sync(at(8)),
        )
        .await
        .unwrap();

        let sets = repo.load_all().await.unwrap();

        assert_eq!(sets.len(), 1);
        assert_eq!(
            sets[0].selected_account_ids.iter().cloned().collect::<Vec<_>>(),
            vec!["ACC1".to_string(), "ACC2".to_string()]
        );
        assert_eq!(sets[0].last_sync_time, Some(at(9)));
        assert_eq!(sets[0].credentials.secret, "pw2");
    }

    #[tokio::test]
    async fn record_sync_never_moves_backwards() {
        let repo = repo();
        let set = repo
            .save(CredentialSet::new(CredentialFields::new("trader01", "pw")).with_last_sync(at(10)))
            .await
            .unwrap();

        assert!(repo.record_sync(&set.id, at(9)).await.unwrap());

        let stored = repo.get(&set.id).await.unwrap().unwrap();
        assert_eq!(stored.last_sync_time, Some(at(10)));
    }

    #[tokio::test]
    async fn update_selection_replaces_accounts() {
        let repo = repo();
        let set = repo
            .save(CredentialSet::new(CredentialFields::new("trader01", "pw")).with_accounts(["ACC1"]))
            .await
            .unwrap();

        repo.update_selection(&set.id, ["ACC2", "ACC3"], false)
            .await
            .unwrap();

        let stored = repo.get(&set.id).await.unwrap().unwrap();
        assert!(!stored.selected_account_ids.contains("ACC1"));
        assert_eq!(stored.selected_account_ids.len(), 2);
    }

    #[tokio::test]
    async fn remove_and_missing_ids() {
        let repo = repo();
        let set = repo
            .save(CredentialSet::new(CredentialFields::new("trader01", "pw")))
            .await
            .unwrap();
        let ghost = CredentialId::from_account_identifier("ghost");

        assert!(!repo.record_sync(&ghost, at(1)).await.unwrap());
        assert!(repo.remove(&set.id).await.unwrap());
        assert!(!repo.remove(&set.id).await.unwrap());
        assert!(repo.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn attempts_are_shared_and_cleared() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = CredentialRepository::new(store.clone());
        let second = CredentialRepository::new(store);
        let set = first
            .save(CredentialSet::new(CredentialFields::new("trader01", "pw")))
            .await
            .unwrap();

        first.record_attempt(&set.id, at(9)).await.unwrap();
        assert_eq!(second.attempts().await.unwrap().get(&set.id), Some(&at(9)));

        second.clear_attempt(&set.id).await.unwrap();
        assert!(first.attempts().await.unwrap().is_empty());

        first.record_attempt(&set.id, at(10)).await.unwrap();
        first.remove(&set.id).await.unwrap();
        assert!(second.attempts().await.unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn merge_yields_union_and_latest_sync(
            left in proptest::collection::btree_set("[A-C][0-9]", 0..4),
            right in proptest::collection::btree_set("[A-C][0-9]", 0..4),
            h1 in 0u32..24,
            h2 in 0u32..24,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let repo = repo();
                repo.save(
                    CredentialSet::new(CredentialFields::new("trader01", "pw"))
                        .with_accounts(left.clone())
                        .with_last_sync(at(h1)),
                ).await.unwrap();
                let stored = repo.save(
                    CredentialSet::new(CredentialFields::new("TRADER01", "pw"))
                        .with_accounts(right.clone())
                        .with_last_sync(at(h2)),
                ).await.unwrap();

                let union: std::collections::BTreeSet<String> = left.union(&right).cloned().collect();
                prop_assert_eq!(stored.selected_account_ids, union);
                prop_assert_eq!(stored.last_sync_time, Some(at(h1.max(h2))));
                prop_assert_eq!(repo.load_all().await.unwrap().len(), 1);
                Ok(())
            })?;
        }
    }
}
