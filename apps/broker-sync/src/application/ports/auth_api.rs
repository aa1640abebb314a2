//! Token Endpoint Port (Driven Port)
//!
//! Interface to the provider's HTTP token endpoint and the authenticated
//! account listing used as a post-login probe.
//!
//! # Token Response Shapes
//!
//! ```json
//! {"accessToken":"...","expirationTime":"2024-03-11T15:00:00Z","userId":7,"name":"trader01"}
//! {"p-ticket":"...","p-time":15}
//! {"p-ticket":"...","p-time":15,"p-captcha":true}
//! {"errorText":"Incorrect username or password"}
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::credentials::CredentialFields;
use crate::domain::session::{ProviderAccount, Session, UserIdentity};

// =============================================================================
// Request
// =============================================================================

/// Application identity sent with every token request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppIdentity {
    /// Registered application id.
    pub app_id: String,
    /// Application version.
    pub app_version: String,
    /// Client id.
    pub cid: String,
    /// Client secret.
    pub sec: String,
}

/// Body of a token request.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    /// Login name.
    pub name: String,
    /// Login secret.
    pub password: String,
    /// Application id.
    pub app_id: String,
    /// Application version.
    pub app_version: String,
    /// Client id.
    pub cid: String,
    /// Client secret.
    pub sec: String,
    /// Persistent device id.
    pub device_id: String,
    /// Deferred-retry ticket from a previous response.
    #[serde(rename = "p-ticket", skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

impl TokenRequest {
    /// Build a request from saved credentials.
    #[must_use]
    pub fn new(credentials: &CredentialFields, app: &AppIdentity, device_id: &str) -> Self {
        Self {
            name: credentials.username.clone(),
            password: credentials.secret.clone(),
            app_id: app.app_id.clone(),
            app_version: app.app_version.clone(),
            cid: app.cid.clone(),
            sec: app.sec.clone(),
            device_id: device_id.to_string(),
            ticket: None,
        }
    }

    /// Attach a deferred-retry ticket.
    #[must_use]
    pub fn with_ticket(mut self, ticket: String) -> Self {
        self.ticket = Some(ticket);
        self
    }
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("name", &self.name)
            .field("password", &"[REDACTED]")
            .field("app_id", &self.app_id)
            .field("device_id", &self.device_id)
            .field("ticket", &self.ticket.as_ref().map(|_| "[PRESENT]"))
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Response
// =============================================================================

/// Raw token response as sent by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Bearer token on success.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Token expiry on success.
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
    /// User id on success.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// User name on success.
    #[serde(default)]
    pub name: Option<String>,
    /// Deferred-retry ticket.
    #[serde(default, rename = "p-ticket")]
    pub ticket: Option<String>,
    /// Seconds to wait before using the ticket.
    #[serde(default, rename = "p-time")]
    pub wait_secs: Option<u64>,
    /// Set when the provider demands a CAPTCHA.
    #[serde(default, rename = "p-captcha")]
    pub captcha: Option<bool>,
    /// Error text on failure.
    #[serde(default)]
    pub error_text: Option<String>,
}

/// Token response decoded into exactly one outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    /// A token was issued.
    Granted(Session),
    /// Wait, then resend with the ticket.
    Deferred {
        /// Ticket to attach.
        ticket: String,
        /// Server-specified delay.
        wait: Duration,
    },
    /// Manual CAPTCHA completion is required.
    CaptchaRequired,
    /// Credentials were rejected.
    Rejected(String),
}

impl TokenResponse {
    /// Decide what the response means.
    ///
    /// The CAPTCHA flag wins over everything else, then a ticket, then a
    /// token. A response matching none of these is a rejection.
    #[must_use]
    pub fn into_outcome(self) -> TokenOutcome {
        if self.captcha.unwrap_or(false) {
            return TokenOutcome::CaptchaRequired;
        }

        if let Some(ticket) = self.ticket.filter(|t| !t.is_empty()) {
            return TokenOutcome::Deferred {
                ticket,
                wait: Duration::from_secs(self.wait_secs.unwrap_or(0)),
            };
        }

        if let (Some(token), Some(expiry)) = (self.access_token, self.expiration_time)
            && !token.is_empty()
        {
            let user = self.user_id.map(|user_id| UserIdentity {
                user_id,
                name: self.name.unwrap_or_default(),
            });
            return TokenOutcome::Granted(Session::new(token, expiry, user));
        }

        TokenOutcome::Rejected(
            self.error_text
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "token response carried no token".to_string()),
        )
    }
}

// =============================================================================
// Port
// =============================================================================

/// Errors from the token endpoint adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The bearer token was rejected (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Non-success HTTP status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Request could not be sent.
    #[error("request failed: {0}")]
    Transport(String),

    /// Response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Provider token endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials (and optionally a ticket) for a token.
    async fn request_token(&self, request: &TokenRequest) -> Result<TokenResponse, ApiError>;

    /// List accounts visible to the token's user.
    async fn list_accounts(&self, token: &str) -> Result<Vec<ProviderAccount>, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> TokenOutcome {
        serde_json::from_str::<TokenResponse>(json)
            .unwrap()
            .into_outcome()
    }

    #[test]
    fn success_response_grants_session() {
        let outcome = decode(
            r#"{"accessToken":"tok","expirationTime":"2024-03-11T15:00:00Z","userId":7,"name":"trader01"}"#,
        );
        let TokenOutcome::Granted(session) = outcome else {
            panic!("expected granted, got {outcome:?}");
        };
        assert_eq!(session.token(), "tok");
        assert_eq!(session.user().unwrap().user_id, 7);
    }

    #[test]
    fn ticket_response_defers() {
        let outcome = decode(r#"{"p-ticket":"tk","p-time":15}"#);
        assert_eq!(
            outcome,
            TokenOutcome::Deferred {
                ticket: "tk".into(),
                wait: Duration::from_secs(15)
            }
        );
    }

    #[test]
    fn captcha_flag_beats_ticket() {
        let outcome = decode(r#"{"p-ticket":"tk","p-time":15,"p-captcha":true}"#);
        assert_eq!(outcome, TokenOutcome::CaptchaRequired);
    }

    #[test]
    fn error_text_rejects() {
        let outcome = decode(r#"{"errorText":"Incorrect username or password"}"#);
        assert_eq!(
            outcome,
            TokenOutcome::Rejected("Incorrect username or password".into())
        );
    }

    #[test]
    fn empty_token_is_rejected() {
        let outcome = decode(r#"{"accessToken":"","expirationTime":"2024-03-11T15:00:00Z"}"#);
        assert!(matches!(outcome, TokenOutcome::Rejected(_)));
    }

    #[test]
    fn ticket_is_serialized_only_when_present() {
        let creds = CredentialFields::new("trader01", "pw");
        let request = TokenRequest::new(&creds, &AppIdentity::default(), "dev-1");
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("p-ticket").is_none());
        assert_eq!(json["deviceId"], "dev-1");

        let json = serde_json::to_value(request.with_ticket("tk".into())).unwrap();
        assert_eq!(json["p-ticket"], "tk");
    }

    #[test]
    fn request_debug_hides_password() {
        let creds = CredentialFields::new("trader01", "hunter2");
        let request = TokenRequest::new(&creds, &AppIdentity::default(), "dev-1");
        assert!(!format!("{request:?}").contains("hunter2"));
    }
}
