//! Session Types
//!
//! A session is a bearer token obtained from the provider's token endpoint
//! together with its expiry and the identity of the user it belongs to.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Check whether a token expiring at `expiry` may still be used at `now`.
///
/// Strict comparison: a token whose expiry equals `now` is already invalid.
#[must_use]
pub fn is_token_valid(expiry: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expiry > now
}

/// Identity of the user a token was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    /// Provider user id.
    pub user_id: i64,
    /// Display name.
    pub name: String,
}

/// An authenticated session.
///
/// The `Debug` implementation never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    expires_at: DateTime<Utc>,
    user: Option<UserIdentity>,
}

impl Session {
    /// Create a session.
    #[must_use]
    pub const fn new(
        token: String,
        expires_at: DateTime<Utc>,
        user: Option<UserIdentity>,
    ) -> Self {
        Self {
            token,
            expires_at,
            user,
        }
    }

    /// Bearer token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Expiry instant.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// User the token was issued to, if known.
    #[must_use]
    pub const fn user(&self) -> Option<&UserIdentity> {
        self.user.as_ref()
    }

    /// Whether the token is non-empty and has not expired at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token.is_empty() && is_token_valid(self.expires_at, now)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// An account visible to the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAccount {
    /// Numeric provider id.
    pub id: i64,
    /// Account name, used as the account identifier throughout the engine.
    pub name: String,
    /// Whether the provider reports the account as active.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn expiry_equal_to_now_is_invalid() {
        assert!(!is_token_valid(base(), base()));
    }

    #[test]
    fn expiry_one_millisecond_ahead_is_valid() {
        assert!(is_token_valid(base() + Duration::milliseconds(1), base()));
    }

    #[test]
    fn empty_token_is_never_valid() {
        let session = Session::new(String::new(), base() + Duration::hours(1), None);
        assert!(!session.is_valid_at(base()));
    }

    #[test]
    fn debug_redacts_token() {
        let session = Session::new("abc.def".to_string(), base(), None);
        let debug = format!("{session:?}");
        assert!(!debug.contains("abc.def"));
        assert!(debug.contains("[REDACTED]"));
    }

    proptest! {
        #[test]
        fn validity_is_strict_comparison(offset_ms in -100_000_i64..100_000) {
            let now = base();
            let expiry = now + Duration::milliseconds(offset_ms);
            prop_assert_eq!(is_token_valid(expiry, now), expiry > now);
        }
    }
}
