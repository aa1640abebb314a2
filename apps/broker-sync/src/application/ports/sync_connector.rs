//! Sync Stream Port (Driven Port)
//!
//! The orchestrator opens an account-sync stream through this seam. The
//! production adapter sits on the duplex transport; tests script frames.

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::progress::ProgressEvent;

/// Parameters of the `init` request that starts a sync run.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncInit {
    /// Bearer token for the run.
    pub token: String,
    /// Accounts to synchronize.
    pub accounts: Vec<String>,
    /// Earliest backfill start across `accounts`.
    pub start_date: NaiveDate,
}

impl SyncInit {
    /// Same run parameters with a fresh token.
    #[must_use]
    pub fn with_token(&self, token: String) -> Self {
        Self {
            token,
            ..self.clone()
        }
    }
}

impl fmt::Debug for SyncInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncInit")
            .field("token", &"[REDACTED]")
            .field("accounts", &self.accounts)
            .field("start_date", &self.start_date)
            .finish()
    }
}

/// One inbound frame of a sync stream, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFrame {
    /// Typed progress.
    Progress(ProgressEvent),
    /// Server log text with no progress meaning.
    Message(String),
    /// Server rejected or aborted the run.
    Error(String),
    /// Any other traffic; only resets the idle timer.
    Activity,
}

/// Errors opening a sync stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    /// The endpoint could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The endpoint rejected the token.
    #[error("authorization rejected: {0}")]
    AuthRejected(String),

    /// The `init` request failed.
    #[error("sync init rejected: {0}")]
    InitRejected(String),

    /// The stream was requested on the wrong endpoint.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),
}

/// Opens sync streams.
#[async_trait]
pub trait SyncConnector: Send + Sync {
    /// Connect, authorize and send `init`.
    async fn open(&self, init: &SyncInit) -> Result<Box<dyn SyncConnection>, ConnectorError>;
}

/// A live sync stream.
#[async_trait]
pub trait SyncConnection: Send {
    /// Next frame, or `None` once the stream closed.
    async fn next_frame(&mut self) -> Option<SyncFrame>;

    /// Close the stream. Idempotent.
    async fn close(&mut self);
}
