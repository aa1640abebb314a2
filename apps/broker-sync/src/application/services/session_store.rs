//! Session Store
//!
//! Typed view over the shared key-value store for everything the session
//! manager caches: token, expiry, owner, user identity, last known accounts
//! and the device id.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::application::ports::{KeyValueStore, StoreError, read_json, write_json};
use crate::domain::credentials::CredentialId;
use crate::domain::session::{ProviderAccount, Session, UserIdentity};

/// Key of the cached bearer token.
pub const TOKEN_KEY: &str = "broker-sync.session.token";
/// Key of the cached token expiry (RFC 3339).
pub const EXPIRATION_KEY: &str = "broker-sync.session.expiration";
/// Key of the credential set the cached token belongs to.
pub const OWNER_KEY: &str = "broker-sync.session.owner";
/// Key of the cached user identity.
pub const USER_KEY: &str = "broker-sync.session.user";
/// Key of the last known provider accounts.
pub const ACCOUNTS_KEY: &str = "broker-sync.session.accounts";
/// Key of the persistent device id.
pub const DEVICE_ID_KEY: &str = "broker-sync.device-id";

/// Cached session state.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    /// Create a session store over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load the cached session and the credential set that owns it.
    ///
    /// Returns `None` when no token is cached or the expiry is missing or
    /// unparseable.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read.
    pub async fn load(&self) -> Result<Option<(CredentialId, Session)>, StoreError> {
        let Some(token) = self.store.get(TOKEN_KEY).await? else {
            return Ok(None);
        };
        let Some(expiry) = self
            .store
            .get(EXPIRATION_KEY)
            .await?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|at| at.with_timezone(&Utc))
        else {
            return Ok(None);
        };
        let Some(owner) = read_json::<CredentialId>(self.store.as_ref(), OWNER_KEY).await? else {
            return Ok(None);
        };
        let user = read_json::<UserIdentity>(self.store.as_ref(), USER_KEY).await?;

        Ok(Some((owner, Session::new(token, expiry, user))))
    }

    /// Cache `session` as belonging to `owner`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if a write fails.
    pub async fn save(&self, owner: &CredentialId, session: &Session) -> Result<(), StoreError> {
        self.store.set(TOKEN_KEY, session.token()).await?;
        self.store
            .set(EXPIRATION_KEY, &session.expires_at().to_rfc3339())
            .await?;
        write_json(self.store.as_ref(), OWNER_KEY, owner).await?;
        match session.user() {
            Some(user) => write_json(self.store.as_ref(), USER_KEY, user).await,
            None => self.store.remove(USER_KEY).await,
        }
    }

    /// Drop the cached token and expiry. Accounts and device id are kept.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if a delete fails.
    pub async fn clear_token(&self) -> Result<(), StoreError> {
        self.store.remove(TOKEN_KEY).await?;
        self.store.remove(EXPIRATION_KEY).await?;
        self.store.remove(OWNER_KEY).await
    }

    /// Last known provider accounts.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or holds bad JSON.
    pub async fn accounts(&self) -> Result<Vec<ProviderAccount>, StoreError> {
        Ok(read_json(self.store.as_ref(), ACCOUNTS_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Remember the provider accounts.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the write fails.
    pub async fn save_accounts(&self, accounts: &[ProviderAccount]) -> Result<(), StoreError> {
        write_json(self.store.as_ref(), ACCOUNTS_KEY, accounts).await
    }

    /// Persistent device id, generated on first use.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the store cannot be read or written.
    pub async fn device_id(&self) -> Result<String, StoreError> {
        if let Some(id) = self.store.get(DEVICE_ID_KEY).await?
            && !id.is_empty()
        {
            return Ok(id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.store.set(DEVICE_ID_KEY, &id).await?;
        tracing::debug!(device_id = %id, "Generated device id");
        Ok(id)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}
