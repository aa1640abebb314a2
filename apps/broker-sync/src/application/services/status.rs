//! Status Board
//!
//! Observable lifecycle signals of the engine: connection status, phase per
//! credential set, per-account progress of the current run, aggregate stats
//! and a bounded message log. Every failure class has a discrete message.
//! Messages never carry tokens.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::application::ports::Clock;
use crate::domain::progress::{AccountProgress, ProcessingStats, ProgressTracker};

/// Default number of messages kept in the log.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 200;

// =============================================================================
// Signals
// =============================================================================

/// Health of the duplex connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    /// No connection.
    #[default]
    Disconnected,
    /// Opening and authorizing.
    Connecting,
    /// Open and authorized.
    Connected,
    /// Retrying after a drop.
    Reconnecting,
}

impl ConnectionStatus {
    /// Status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of one credential set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    /// Nothing running.
    #[default]
    Idle,
    /// Obtaining a token.
    Authenticating,
    /// Provider accounts differ from the saved selection.
    AwaitingAccounts,
    /// Sync stream open.
    Syncing,
}

/// A discrete entry of the message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum StatusMessage {
    /// Transport could not connect or authorize.
    ConnectionError {
        /// Credential set id.
        credential: String,
        /// Error text.
        error: String,
    },
    /// Credentials rejected.
    AuthenticationFailed {
        /// Credential set id.
        credential: String,
        /// Provider error text.
        error: String,
    },
    /// Provider demands a CAPTCHA.
    CaptchaRequired {
        /// Credential set id.
        credential: String,
    },
    /// Token request deferred by the provider.
    RateLimited {
        /// Credential set id.
        credential: String,
        /// Seconds until the retry.
        wait_secs: u64,
    },
    /// A subscription was opened on the wrong endpoint.
    InvalidSubscription {
        /// Error text.
        error: String,
    },
    /// Run exceeded its maximum duration.
    SyncTimeout {
        /// Credential set id.
        credential: String,
    },
    /// No inbound frame within the idle window.
    IdleTimeout {
        /// Credential set id.
        credential: String,
        /// Accounts marked failed.
        accounts: Vec<String>,
    },
    /// One account failed; its siblings continue.
    AccountFailed {
        /// Account id.
        account: String,
        /// Error text.
        error: String,
    },
    /// Provider accounts differ from the saved selection.
    AccountsChanged {
        /// Credential set id.
        credential: String,
        /// Accounts the provider lists that were not selected.
        added: Vec<String>,
        /// Selected accounts the provider no longer lists.
        removed: Vec<String>,
    },
    /// Reconnect attempts ran out.
    ReconnectExhausted {
        /// Credential set id.
        credential: String,
        /// Attempts made.
        attempts: u32,
    },
    /// A run started.
    SyncStarted {
        /// Credential set id.
        credential: String,
        /// Accounts in the run.
        accounts: Vec<String>,
        /// Backfill start date sent with `init`.
        start_date: NaiveDate,
    },
    /// A run finished.
    SyncCompleted {
        /// Credential set id.
        credential: String,
        /// Orders emitted across the run.
        orders: u64,
    },
}

impl StatusMessage {
    /// Whether the message reports a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        !matches!(
            self,
            Self::RateLimited { .. }
                | Self::AccountsChanged { .. }
                | Self::SyncStarted { .. }
                | Self::SyncCompleted { .. }
        )
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionError { credential, error } => {
                write!(f, "{credential}: connection failed: {error}")
            }
            Self::AuthenticationFailed { credential, error } => {
                write!(f, "{credential}: authentication failed: {error}")
            }
            Self::CaptchaRequired { credential } => {
                write!(f, "{credential}: CAPTCHA required, log in manually")
            }
            Self::RateLimited {
                credential,
                wait_secs,
            } => write!(f, "{credential}: rate limited, retrying in {wait_secs}s"),
            Self::InvalidSubscription { error } => write!(f, "invalid subscription: {error}"),
            Self::SyncTimeout { credential } => {
                write!(f, "{credential}: sync exceeded its maximum duration")
            }
            Self::IdleTimeout {
                credential,
                accounts,
            } => write!(
                f,
                "{credential}: no data received, {} account(s) marked failed",
                accounts.len()
            ),
            Self::AccountFailed { account, error } => write!(f, "{account}: {error}"),
            Self::AccountsChanged {
                credential,
                added,
                removed,
            } => write!(
                f,
                "{credential}: accounts changed (added: {}, removed: {})",
                added.join(", "),
                removed.join(", ")
            ),
            Self::ReconnectExhausted {
                credential,
                attempts,
            } => write!(f, "{credential}: gave up after {attempts} reconnect attempts"),
            Self::SyncStarted {
                credential,
                accounts,
                start_date,
            } => write!(
                f,
                "{credential}: syncing {} account(s) from {start_date}",
                accounts.len()
            ),
            Self::SyncCompleted { credential, orders } => {
                write!(f, "{credential}: sync complete, {orders} orders")
            }
        }
    }
}

/// A message with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedMessage {
    /// When the message was recorded.
    pub at: DateTime<Utc>,
    /// The message.
    #[serde(flatten)]
    pub message: StatusMessage,
}

/// Point-in-time copy of every signal.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Connection health.
    pub connection: ConnectionStatus,
    /// Phase per credential set id.
    pub phases: BTreeMap<String, SyncPhase>,
    /// Progress of the current or last run, per account.
    pub progress: BTreeMap<String, AccountProgress>,
    /// Aggregate stats of the current or last run.
    pub stats: ProcessingStats,
    /// Whether every account of the last run completed.
    pub all_complete: bool,
    /// Message log, oldest first.
    pub messages: Vec<LoggedMessage>,
}

// =============================================================================
// Board
// =============================================================================

#[derive(Debug, Default)]
struct BoardState {
    connection: ConnectionStatus,
    phases: BTreeMap<String, SyncPhase>,
    progress: BTreeMap<String, AccountProgress>,
    stats: ProcessingStats,
    all_complete: bool,
    messages: VecDeque<LoggedMessage>,
}

/// Shared sink for lifecycle signals.
pub struct StatusBoard {
    state: RwLock<BoardState>,
    capacity: usize,
    clock: Arc<dyn Clock>,
    tx: broadcast::Sender<LoggedMessage>,
}

impl StatusBoard {
    /// Create a board keeping the default number of messages.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_MESSAGE_CAPACITY)
    }

    /// Create a board keeping at most `capacity` messages.
    #[must_use]
    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state: RwLock::new(BoardState::default()),
            capacity: capacity.max(1),
            clock,
            tx,
        }
    }

    /// Set the connection status.
    pub fn set_connection(&self, status: ConnectionStatus) {
        let mut state = self.state.write();
        if state.connection != status {
            tracing::debug!(from = %state.connection, to = %status, "Connection status changed");
            state.connection = status;
        }
    }

    /// Current connection status.
    #[must_use]
    pub fn connection(&self) -> ConnectionStatus {
        self.state.read().connection
    }

    /// Set the phase of a credential set.
    pub fn set_phase(&self, credential: &str, phase: SyncPhase) {
        self.state.write().phases.insert(credential.to_string(), phase);
    }

    /// Phase of a credential set; `Idle` when never seen.
    #[must_use]
    pub fn phase(&self, credential: &str) -> SyncPhase {
        self.state
            .read()
            .phases
            .get(credential)
            .copied()
            .unwrap_or_default()
    }

    /// Copy progress, stats and the completion flag from `tracker`.
    pub fn publish_progress(&self, tracker: &ProgressTracker) {
        let mut state = self.state.write();
        state.progress.clone_from(tracker.accounts());
        state.stats = tracker.stats();
        state.all_complete = tracker.is_all_complete();
    }

    /// Append a message to the log and broadcast it.
    pub fn push(&self, message: StatusMessage) {
        if message.is_error() {
            tracing::warn!(message = %message, "Sync status");
        } else {
            tracing::info!(message = %message, "Sync status");
        }

        let entry = LoggedMessage {
            at: self.clock.now(),
            message,
        };

        {
            let mut state = self.state.write();
            if state.messages.len() == self.capacity {
                state.messages.pop_front();
            }
            state.messages.push_back(entry.clone());
        }

        // No receivers is fine.
        let _ = self.tx.send(entry);
    }

    /// Subscribe to new messages.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LoggedMessage> {
        self.tx.subscribe()
    }

    /// Messages currently in the log, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<StatusMessage> {
        self.state
            .read()
            .messages
            .iter()
            .map(|m| m.message.clone())
            .collect()
    }

    /// Copy of every signal.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.read();
        StatusSnapshot {
            connection: state.connection,
            phases: state.phases.clone(),
            progress: state.progress.clone(),
            stats: state.stats,
            all_complete: state.all_complete,
            messages: state.messages.iter().cloned().collect(),
        }
    }
}

impl fmt::Debug for StatusBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusBoard")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::SystemClock;
    use crate::domain::progress::ProgressEvent;

    fn board(capacity: usize) -> StatusBoard {
        StatusBoard::with_capacity(Arc::new(SystemClock), capacity)
    }

    #[test]
    fn log_is_bounded() {
        let board = board(2);
        for credential in ["a", "b", "c"] {
            board.push(StatusMessage::CaptchaRequired {
                credential: credential.into(),
            });
        }

        let messages = board.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            StatusMessage::CaptchaRequired {
                credential: "b".into()
            }
        );
    }

    #[test]
    fn unknown_credential_is_idle() {
        assert_eq!(board(4).phase("nobody"), SyncPhase::Idle);
    }

    #[test]
    fn publish_progress_copies_tracker() {
        let board = board(4);
        let mut tracker = ProgressTracker::new(["ACC1"]);
        tracker
            .apply(ProgressEvent::AccountCompleted {
                account: "ACC1".into(),
                orders: 12,
            })
            .unwrap();

        board.publish_progress(&tracker);
        let snapshot = board.snapshot();

        assert!(snapshot.all_complete);
        assert_eq!(snapshot.stats.total_orders, 12);
        assert!(snapshot.progress["ACC1"].is_complete);
    }

    #[tokio::test]
    async fn subscribers_receive_messages() {
        let board = board(4);
        let mut rx = board.subscribe();

        board.push(StatusMessage::SyncTimeout {
            credential: "trader01".into(),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(
            received.message,
            StatusMessage::SyncTimeout {
                credential: "trader01".into()
            }
        );
    }

    #[test]
    fn message_serializes_with_kind_tag() {
        let json = serde_json::to_value(StatusMessage::RateLimited {
            credential: "trader01".into(),
            wait_secs: 15,
        })
        .unwrap();
        assert_eq!(json["kind"], "rateLimited");
        assert_eq!(json["waitSecs"], 15);
    }
}
