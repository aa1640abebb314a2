//! Credential Sets
//!
//! A credential set is one saved login for the trading-data provider plus
//! the accounts the user wants synchronized under it. Sets are keyed by a
//! normalized form of the external account identifier, so saving the same
//! login twice merges into one record instead of creating a duplicate.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identity
// =============================================================================

/// Stable identity of a credential set.
///
/// Derived from the external account identifier by trimming surrounding
/// whitespace and lowercasing, so `" Trader01 "` and `"trader01"` collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(String);

impl CredentialId {
    /// Derive the identity from an external account identifier.
    #[must_use]
    pub fn from_account_identifier(identifier: &str) -> Self {
        Self(identifier.trim().to_lowercase())
    }

    /// Borrow the normalized identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Auth Fields
// =============================================================================

/// Opaque authentication fields for one provider login.
///
/// The `Debug` implementation redacts the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialFields {
    /// Login name (also the external account identifier).
    pub username: String,
    /// Password or API secret.
    pub secret: String,
    /// Server the login belongs to (demo or live cluster name).
    #[serde(default)]
    pub server: String,
    /// Location or region hint sent by some providers.
    #[serde(default)]
    pub location: String,
}

impl CredentialFields {
    /// Create auth fields with no server or location hint.
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            server: String::new(),
            location: String::new(),
        }
    }

    /// Attach a server name.
    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// Identity derived from the username.
    #[must_use]
    pub fn identity(&self) -> CredentialId {
        CredentialId::from_account_identifier(&self.username)
    }
}

impl fmt::Debug for CredentialFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialFields")
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("server", &self.server)
            .field("location", &self.location)
            .finish()
    }
}

// =============================================================================
// Credential Set
// =============================================================================

/// A saved credential record.
///
/// # Wire Format (JSON)
/// ```json
/// {"id":"trader01","credentials":{...},"selectedAccountIds":["ACC1"],
///  "allAccountsFlag":false,"lastSyncTimeIso":"2024-03-10T12:00:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSet {
    /// Normalized identity.
    pub id: CredentialId,
    /// Auth fields.
    pub credentials: CredentialFields,
    /// Accounts selected for synchronization.
    #[serde(default)]
    pub selected_account_ids: BTreeSet<String>,
    /// Sync every account the provider reports, ignoring the selection.
    #[serde(default, rename = "allAccountsFlag")]
    pub all_accounts: bool,
    /// When this set last completed a sync.
    #[serde(default, rename = "lastSyncTimeIso")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl CredentialSet {
    /// Create a new credential set with an identity derived from the username.
    #[must_use]
    pub fn new(credentials: CredentialFields) -> Self {
        Self {
            id: credentials.identity(),
            credentials,
            selected_account_ids: BTreeSet::new(),
            all_accounts: false,
            last_sync_time: None,
        }
    }

    /// Select the given accounts.
    #[must_use]
    pub fn with_accounts<I, S>(mut self, accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_account_ids = accounts.into_iter().map(Into::into).collect();
        self
    }

    /// Sync every account reported by the provider.
    #[must_use]
    pub const fn with_all_accounts(mut self) -> Self {
        self.all_accounts = true;
        self
    }

    /// Set the last sync time.
    #[must_use]
    pub const fn with_last_sync(mut self, at: DateTime<Utc>) -> Self {
        self.last_sync_time = Some(at);
        self
    }

    /// Merge another record with the same identity into this one.
    ///
    /// Selected accounts are unioned, the later sync timestamp wins and the
    /// incoming auth fields replace the stored ones. `all_accounts` is set if
    /// either side requested it.
    pub fn merge(&mut self, other: Self) {
        debug_assert_eq!(self.id, other.id, "merge requires matching identities");

        self.credentials = other.credentials;
        self.selected_account_ids.extend(other.selected_account_ids);
        self.all_accounts |= other.all_accounts;
        self.last_sync_time = match (self.last_sync_time, other.last_sync_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Collapse records that share an identity.
///
/// Order of first appearance is preserved.
#[must_use]
pub fn dedupe(sets: Vec<CredentialSet>) -> Vec<CredentialSet> {
    let mut merged: Vec<CredentialSet> = Vec::with_capacity(sets.len());

    for set in sets {
        if let Some(existing) = merged.iter_mut().find(|s| s.id == set.id) {
            existing.merge(set);
        } else {
            merged.push(set);
        }
    }

    merged
}
