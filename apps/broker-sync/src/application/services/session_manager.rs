//! Session Manager
//!
//! Obtains and caches bearer tokens.
//!
//! # Flow
//!
//! 1. Reuse the cached token if it is valid and belongs to the credential set
//! 2. Otherwise request one, following deferred-retry tickets until the
//!    provider grants, rejects or demands a CAPTCHA
//! 3. Probe the token by listing accounts; a 401 clears the cache and runs
//!    the whole flow once more

use std::sync::Arc;

use crate::application::ports::{
    ApiError, AppIdentity, AuthApi, Clock, StoreError, TokenOutcome, TokenRequest,
};
use crate::application::services::session_store::SessionStore;
use crate::application::services::status::{StatusBoard, StatusMessage};
use crate::domain::credentials::{CredentialFields, CredentialId};
use crate::domain::session::{ProviderAccount, Session};
use crate::infrastructure::metrics::{self, AuthOutcome};

/// Errors from the session manager.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The provider rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The provider demands manual CAPTCHA completion.
    #[error("captcha required")]
    CaptchaRequired,

    /// The token endpoint failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The session cache failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A usable session plus the accounts it can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    /// The session.
    pub session: Session,
    /// Accounts returned by the probe.
    pub accounts: Vec<ProviderAccount>,
}

/// Obtains tokens for credential sets.
pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    sessions: SessionStore,
    clock: Arc<dyn Clock>,
    app: AppIdentity,
    status: Option<Arc<StatusBoard>>,
}

impl SessionManager {
    /// Create a new session manager.
    #[must_use]
    pub fn new(
        api: Arc<dyn AuthApi>,
        sessions: SessionStore,
        clock: Arc<dyn Clock>,
        app: AppIdentity,
    ) -> Self {
        Self {
            api,
            sessions,
            clock,
            app,
            status: None,
        }
    }

    /// Report rate limiting to `board`.
    #[must_use]
    pub fn with_status_board(mut self, board: Arc<StatusBoard>) -> Self {
        self.status = Some(board);
        self
    }

    /// The cached token if it is still valid.
    ///
    /// An expired token is cleared from the cache.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Store` if the cache cannot be read or cleared.
    pub async fn get_valid_token(&self) -> Result<Option<String>, SessionError> {
        Ok(self
            .valid_cached()
            .await?
            .map(|(_, session)| session.token().to_string()))
    }

    /// Obtain a probed session for `credentials`.
    ///
    /// # Errors
    ///
    /// - `SessionError::CaptchaRequired` when the provider demands a CAPTCHA
    /// - `SessionError::AuthenticationFailed` when the credentials are rejected
    /// - `SessionError::Api` when the endpoint fails, including a second 401
    /// - `SessionError::Store` when the cache fails
    pub async fn authenticate(
        &self,
        credentials: &CredentialFields,
    ) -> Result<AuthenticatedSession, SessionError> {
        let owner = credentials.identity();
        let mut retried = false;

        loop {
            let session = match self.valid_cached().await? {
                Some((cached_owner, session)) if cached_owner == owner => {
                    tracing::debug!(credential = %owner, "Reusing cached token");
                    session
                }
                _ => self.request_session(&owner, credentials).await?,
            };

            match self.api.list_accounts(session.token()).await {
                Ok(accounts) => {
                    self.sessions.save_accounts(&accounts).await?;
                    tracing::info!(
                        credential = %owner,
                        accounts = accounts.len(),
                        "Authenticated"
                    );
                    return Ok(AuthenticatedSession { session, accounts });
                }
                Err(ApiError::Unauthorized) if !retried => {
                    tracing::warn!(credential = %owner, "Token rejected by probe, re-authenticating");
                    self.sessions.clear_token().await?;
                    retried = true;
                }
                Err(ApiError::Unauthorized) => {
                    tracing::warn!(credential = %owner, "Fresh token rejected by probe");
                    self.sessions.clear_token().await?;
                    return Err(ApiError::Unauthorized.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn valid_cached(&self) -> Result<Option<(CredentialId, Session)>, SessionError> {
        let Some((owner, session)) = self.sessions.load().await? else {
            return Ok(None);
        };

        if session.is_valid_at(self.clock.now()) {
            Ok(Some((owner, session)))
        } else {
            tracing::debug!(credential = %owner, "Cached token expired");
            self.sessions.clear_token().await?;
            Ok(None)
        }
    }

    async fn request_session(
        &self,
        owner: &CredentialId,
        credentials: &CredentialFields,
    ) -> Result<Session, SessionError> {
        let device_id = self.sessions.device_id().await?;
        let mut request = TokenRequest::new(credentials, &self.app, &device_id);

        loop {
            let response = self.api.request_token(&request).await?;

            match response.into_outcome() {
                TokenOutcome::Granted(session) => {
                    metrics::record_auth(AuthOutcome::Granted);
                    self.sessions.save(owner, &session).await?;
                    return Ok(session);
                }
                TokenOutcome::Deferred { ticket, wait } => {
                    metrics::record_auth(AuthOutcome::Deferred);
                    tracing::info!(
                        credential = %owner,
                        wait_secs = wait.as_secs(),
                        "Token request deferred"
                    );
                    self.report(StatusMessage::RateLimited {
                        credential: owner.to_string(),
                        wait_secs: wait.as_secs(),
                    });
                    tokio::time::sleep(wait).await;
                    request = request.with_ticket(ticket);
                }
                TokenOutcome::CaptchaRequired => {
                    metrics::record_auth(AuthOutcome::Captcha);
                    return Err(SessionError::CaptchaRequired);
                }
                TokenOutcome::Rejected(text) => {
                    metrics::record_auth(AuthOutcome::Rejected);
                    return Err(SessionError::AuthenticationFailed(text));
                }
            }
        }
    }

    fn report(&self, message: StatusMessage) {
        if let Some(board) = &self.status {
            board.push(message);
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("app_id", &self.app.app_id)
            .finish_non_exhaustive()
    }
}
