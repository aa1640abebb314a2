//! Sync Orchestrator
//!
//! Drives per-credential sync runs and the periodic auto-sync scan.
//!
//! # Per-Credential Run
//!
//! ```text
//! Idle -> Authenticating -> [AwaitingAccounts] -> Syncing -> Idle
//! ```
//!
//! 1. Authenticate through the session manager
//! 2. Check the provider's accounts against the saved selection
//! 3. Plan the backfill from local trade history
//! 4. Open a sync stream and apply frames until every account settles,
//!    the stream goes quiet, the run exceeds its ceiling, or it closes
//!
//! # Scan
//!
//! On weekdays, due credential sets are synced one after another while
//! this process holds the shared sync lock.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    Clock, ConnectorError, StoreError, SyncConnector, SyncFrame, SyncInit, TradeHistory,
};
use crate::application::services::credential_repository::CredentialRepository;
use crate::application::services::session_manager::{SessionError, SessionManager};
use crate::application::services::status::{
    ConnectionStatus, StatusBoard, StatusMessage, SyncPhase,
};
use crate::application::services::sync_lock::SyncLockManager;
use crate::domain::credentials::{CredentialId, CredentialSet};
use crate::domain::progress::{ProgressEvent, ProgressTracker, ProgressUpdate};
use crate::domain::schedule::{BackfillPlan, DEFAULT_BACKFILL_DAYS, is_due, is_scan_window};
use crate::domain::session::ProviderAccount;
use crate::infrastructure::metrics::{self, ScanOutcome};
use crate::infrastructure::transport::{ReconnectConfig, ReconnectPolicy};

// =============================================================================
// Settings
// =============================================================================

/// Timing and sizing knobs for the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Interval between auto-sync scans.
    pub scan_interval: Duration,
    /// Time since the last successful sync after which a set is due.
    pub due_threshold: Duration,
    /// Minimum time between two attempts for the same set.
    pub cool_down: Duration,
    /// Pause between credential sets within one scan.
    pub inter_credential_delay: Duration,
    /// Maximum silence on a sync stream.
    pub idle_timeout: Duration,
    /// Ceiling on one run.
    pub max_duration: Duration,
    /// Days fetched for accounts with no local history.
    pub backfill_days: u64,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60 * 60),
            due_threshold: Duration::from_secs(60 * 60),
            cool_down: Duration::from_secs(60 * 60),
            inter_credential_delay: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(15),
            max_duration: Duration::from_secs(60 * 60),
            backfill_days: DEFAULT_BACKFILL_DAYS,
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Outcomes and Errors
// =============================================================================

/// How a run ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every account settled.
    Completed {
        /// Orders emitted across completed accounts.
        orders: u64,
        /// Accounts that failed.
        failed: Vec<String>,
    },
    /// The provider's accounts differ from the saved selection.
    AccountsChanged {
        /// Provider accounts outside the selection.
        added: Vec<String>,
        /// Selected accounts the provider no longer lists.
        removed: Vec<String>,
    },
    /// A run for the set is already in progress.
    AlreadyRunning,
    /// The set was attempted too recently.
    CoolingDown {
        /// Time until the next attempt is allowed.
        retry_after: Duration,
    },
    /// The stream went quiet.
    IdleTimeout {
        /// Accounts marked failed.
        failed: Vec<String>,
    },
    /// The run exceeded its maximum duration.
    SyncTimeout,
    /// The stream closed before every account settled.
    StreamClosed,
    /// Shutdown was requested.
    Cancelled,
}

impl SyncOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::AccountsChanged { .. } => "accounts_changed",
            Self::AlreadyRunning => "already_running",
            Self::CoolingDown { .. } => "cooling_down",
            Self::IdleTimeout { .. } => "idle_timeout",
            Self::SyncTimeout => "sync_timeout",
            Self::StreamClosed => "stream_closed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Errors from a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No saved set with this id.
    #[error("unknown credential set: {0}")]
    UnknownCredential(CredentialId),

    /// The run has no accounts to sync.
    #[error("no accounts to sync for {0}")]
    NoAccounts(CredentialId),

    /// No previous run to reconnect to.
    #[error("nothing to resume for {0}")]
    NothingToResume(CredentialId),

    /// Reconnect attempts ran out.
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    /// Authentication failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The sync stream could not be opened.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// Shared storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one scan.
#[derive(Debug)]
pub enum ScanReport {
    /// Outside the scan window.
    OutsideWindow,
    /// No set was due.
    NothingDue,
    /// Another process holds the lock.
    LockBusy,
    /// Due sets were processed, in order.
    Ran(Vec<(CredentialId, Result<SyncOutcome, SyncError>)>),
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Removes a set from the active list when the run ends.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<CredentialId>>,
    id: CredentialId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        active.remove(&self.id);
        metrics::set_active_syncs(active.len());
    }
}

/// Coordinates sync runs.
pub struct SyncOrchestrator {
    credentials: CredentialRepository,
    sessions: Arc<SessionManager>,
    connector: Arc<dyn SyncConnector>,
    history: Arc<dyn TradeHistory>,
    lock: SyncLockManager,
    status: Arc<StatusBoard>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    active: Mutex<HashSet<CredentialId>>,
    last_init: Mutex<HashMap<CredentialId, SyncInit>>,
}

impl SyncOrchestrator {
    /// Create a new orchestrator.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credentials: CredentialRepository,
        sessions: Arc<SessionManager>,
        connector: Arc<dyn SyncConnector>,
        history: Arc<dyn TradeHistory>,
        lock: SyncLockManager,
        status: Arc<StatusBoard>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            credentials,
            sessions,
            connector,
            history,
            lock,
            status,
            clock,
            settings,
            active: Mutex::new(HashSet::new()),
            last_init: Mutex::new(HashMap::new()),
        }
    }

    /// Status board the orchestrator reports to.
    #[must_use]
    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    // -------------------------------------------------------------------------
    // Per-credential
    // -------------------------------------------------------------------------

    /// Run one sync for a saved credential set.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the set is unknown, authentication fails,
    /// the stream cannot be opened or storage fails.
    pub async fn sync_credential(
        &self,
        id: &CredentialId,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let set = self
            .credentials
            .get(id)
            .await?
            .ok_or_else(|| SyncError::UnknownCredential(id.clone()))?;

        let Some(_guard) = self.enter(id) else {
            tracing::debug!(credential = %id, "Sync already running");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let now = self.clock.now();
        let last_attempt = self.credentials.attempts().await?.get(id).copied();
        if let Some(retry_after) = self.cool_down_remaining(last_attempt, now) {
            tracing::debug!(
                credential = %id,
                retry_after_secs = retry_after.as_secs(),
                "Sync cooling down"
            );
            return Ok(SyncOutcome::CoolingDown { retry_after });
        }
        self.credentials.record_attempt(id, now).await?;

        let started = Instant::now();
        let result = self.run(&set, cancel).await;

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        metrics::record_run(label, started.elapsed());
        if self.status.phase(id.as_str()) != SyncPhase::AwaitingAccounts {
            self.status.set_phase(id.as_str(), SyncPhase::Idle);
        }
        result
    }

    /// Record the account choice made after `AccountsChanged`, then sync.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UnknownCredential` if the set does not exist, or
    /// any error of [`Self::sync_credential`].
    pub async fn confirm_accounts<I, S>(
        &self,
        id: &CredentialId,
        selection: I,
        all_accounts: bool,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        if !self
            .credentials
            .update_selection(id, selection, all_accounts)
            .await?
        {
            return Err(SyncError::UnknownCredential(id.clone()));
        }

        tracing::info!(credential = %id, all_accounts, "Account selection confirmed");
        self.credentials.clear_attempt(id).await?;
        self.status.set_phase(id.as_str(), SyncPhase::Idle);
        self.sync_credential(id, cancel).await
    }

    /// Re-open the last run of a set with a fresh token.
    ///
    /// Reuses the previous run's accounts and start date. Attempts follow
    /// the reconnect backoff; when they run out the error is
    /// `SyncError::ReconnectExhausted`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NothingToResume` without a previous run,
    /// `SyncError::Session` when the credentials are rejected, and
    /// `SyncError::ReconnectExhausted` when every attempt failed.
    pub async fn reconnect(
        &self,
        id: &CredentialId,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let previous = self
            .last_init
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NothingToResume(id.clone()))?;
        let set = self
            .credentials
            .get(id)
            .await?
            .ok_or_else(|| SyncError::UnknownCredential(id.clone()))?;

        let Some(_guard) = self.enter(id) else {
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let deadline = Instant::now() + self.settings.max_duration;
        let mut policy = ReconnectPolicy::new(self.settings.reconnect.clone());
        while let Some(delay) = policy.next_delay() {
            metrics::record_reconnect();
            self.status.set_connection(ConnectionStatus::Reconnecting);
            tracing::info!(
                credential = %id,
                attempt = policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(SyncOutcome::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }

            self.status.set_phase(id.as_str(), SyncPhase::Authenticating);
            let authenticated =
                tokio::time::timeout_at(deadline, self.sessions.authenticate(&set.credentials)).await;
            let auth = match authenticated {
                Err(_) => {
                    self.status.set_phase(id.as_str(), SyncPhase::Idle);
                    return Ok(self.timed_out(id));
                }
                Ok(Ok(auth)) => auth,
                Ok(Err(e @ (SessionError::CaptchaRequired | SessionError::AuthenticationFailed(_)))) => {
                    self.report_session_error(id, &e);
                    self.status.set_phase(id.as_str(), SyncPhase::Idle);
                    return Err(e.into());
                }
                Ok(Err(e)) => {
                    tracing::warn!(credential = %id, error = %e, "Reconnect authentication failed");
                    continue;
                }
            };

            let init = previous.with_token(auth.session.token().to_string());
            match self.stream(id, init, deadline, cancel).await {
                Ok(SyncOutcome::StreamClosed) => {
                    tracing::warn!(credential = %id, "Stream closed again");
                }
                Err(SyncError::Connector(e)) => {
                    tracing::warn!(credential = %id, error = %e, "Reconnect attempt failed");
                }
                other => {
                    self.status.set_phase(id.as_str(), SyncPhase::Idle);
                    return other;
                }
            }
        }

        let attempts = policy.attempt_count();
        self.status.set_connection(ConnectionStatus::Disconnected);
        self.status.set_phase(id.as_str(), SyncPhase::Idle);
        self.status.push(StatusMessage::ReconnectExhausted {
            credential: id.to_string(),
            attempts,
        });
        Err(SyncError::ReconnectExhausted(attempts))
    }

    fn enter(&self, id: &CredentialId) -> Option<ActiveGuard<'_>> {
        let mut active = self.active.lock();
        if !active.insert(id.clone()) {
            return None;
        }
        metrics::set_active_syncs(active.len());
        Some(ActiveGuard {
            active: &self.active,
            id: id.clone(),
        })
    }

    fn cool_down_remaining(
        &self,
        last_attempt: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let last = last_attempt?;
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        let remaining = self.settings.cool_down.saturating_sub(elapsed);
        (!remaining.is_zero()).then_some(remaining)
    }

    async fn run(
        &self,
        set: &CredentialSet,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let id = &set.id;
        let deadline = Instant::now() + self.settings.max_duration;
        self.status.set_phase(id.as_str(), SyncPhase::Authenticating);

        let authenticated =
            tokio::time::timeout_at(deadline, self.sessions.authenticate(&set.credentials)).await;
        let auth = match authenticated {
            Err(_) => return Ok(self.timed_out(id)),
            Ok(Ok(auth)) => auth,
            Ok(Err(e)) => {
                self.report_session_error(id, &e);
                return Err(e.into());
            }
        };

        let accounts = match resolve_accounts(set, &auth.accounts) {
            Ok(accounts) => accounts,
            Err((added, removed)) => {
                self.status.set_phase(id.as_str(), SyncPhase::AwaitingAccounts);
                self.status.push(StatusMessage::AccountsChanged {
                    credential: id.to_string(),
                    added: added.clone(),
                    removed: removed.clone(),
                });
                return Ok(SyncOutcome::AccountsChanged { added, removed });
            }
        };

        let mut latest = BTreeMap::new();
        for account in &accounts {
            latest.insert(
                account.clone(),
                self.history.latest_trade_date(account).await?,
            );
        }
        let today = self.clock.now().date_naive();
        let plan = BackfillPlan::build(&latest, today, self.settings.backfill_days)
            .ok_or_else(|| SyncError::NoAccounts(id.clone()))?;
        for (account, start) in &plan.per_account {
            tracing::debug!(credential = %id, account = %account, start = %start, "Backfill start");
        }

        let init = SyncInit {
            token: auth.session.token().to_string(),
            accounts,
            start_date: plan.start_date,
        };
        self.last_init.lock().insert(id.clone(), init.clone());

        self.stream(id, init, deadline, cancel).await
    }

    /// Apply frames until the run settles. `deadline` bounds the whole run,
    /// authentication included.
    async fn stream(
        &self,
        id: &CredentialId,
        init: SyncInit,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        self.status.set_connection(ConnectionStatus::Connecting);
        let mut connection = match self.connector.open(&init).await {
            Ok(connection) => connection,
            Err(e) => {
                self.status.set_connection(ConnectionStatus::Disconnected);
                self.report_connector_error(id, &e);
                return Err(e.into());
            }
        };
        self.status.set_connection(ConnectionStatus::Connected);
        self.status.set_phase(id.as_str(), SyncPhase::Syncing);
        self.status.push(StatusMessage::SyncStarted {
            credential: id.to_string(),
            accounts: init.accounts.clone(),
            start_date: init.start_date,
        });

        let mut tracker = ProgressTracker::new(init.accounts.iter().cloned());
        self.status.publish_progress(&tracker);

        let deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break SyncOutcome::Cancelled,
                () = &mut deadline => break self.timed_out(id),
                frame = tokio::time::timeout(self.settings.idle_timeout, connection.next_frame()) => {
                    match frame {
                        Err(_) => {
                            let failed = tracker.fail_in_flight("no data received before idle timeout");
                            tracing::warn!(credential = %id, failed = failed.len(), "Sync stream idle");
                            self.status.push(StatusMessage::IdleTimeout {
                                credential: id.to_string(),
                                accounts: failed.clone(),
                            });
                            break SyncOutcome::IdleTimeout { failed };
                        }
                        Ok(None) => {
                            tracing::warn!(credential = %id, "Sync stream closed");
                            break SyncOutcome::StreamClosed;
                        }
                        Ok(Some(frame)) => {
                            self.apply_frame(&mut tracker, frame);
                            self.status.publish_progress(&tracker);
                            if tracker.is_settled() {
                                break settled_outcome(&tracker);
                            }
                        }
                    }
                }
            }
        };

        connection.close().await;
        self.status.set_connection(ConnectionStatus::Disconnected);
        self.status.publish_progress(&tracker);

        if let SyncOutcome::Completed { orders, .. } = &outcome {
            if tracker.is_all_complete() {
                self.credentials.record_sync(id, self.clock.now()).await?;
            }
            self.status.push(StatusMessage::SyncCompleted {
                credential: id.to_string(),
                orders: *orders,
            });
        }
        self.status.set_phase(id.as_str(), SyncPhase::Idle);

        Ok(outcome)
    }

    fn timed_out(&self, id: &CredentialId) -> SyncOutcome {
        tracing::warn!(credential = %id, "Sync exceeded maximum duration");
        self.status.push(StatusMessage::SyncTimeout {
            credential: id.to_string(),
        });
        SyncOutcome::SyncTimeout
    }

    fn apply_frame(&self, tracker: &mut ProgressTracker, frame: SyncFrame) {
        match frame {
            SyncFrame::Progress(event) => {
                let failure = match &event {
                    ProgressEvent::AccountFailed { account, error } => {
                        Some((account.clone(), error.clone()))
                    }
                    _ => None,
                };

                match tracker.apply(event) {
                    Ok(ProgressUpdate::Applied) => {
                        metrics::record_frame_received();
                        if let Some((account, error)) = failure {
                            self.status.push(StatusMessage::AccountFailed { account, error });
                        }
                    }
                    Ok(ProgressUpdate::StaleDay) => {
                        metrics::record_frame_dropped("stale_day");
                        tracing::debug!("Ignoring regressed day progress");
                    }
                    Ok(ProgressUpdate::AlreadySettled) => {
                        metrics::record_frame_dropped("settled");
                        tracing::debug!("Ignoring progress for settled account");
                    }
                    Err(e) => {
                        metrics::record_frame_dropped("unattributed");
                        tracing::warn!(error = %e, "Dropping progress frame");
                    }
                }
            }
            SyncFrame::Message(text) => {
                tracing::debug!(server = %text, "Sync server message");
            }
            SyncFrame::Error(text) => {
                tracing::warn!(error = %text, "Sync server reported failure");
                for account in tracker.fail_in_flight(&text) {
                    self.status.push(StatusMessage::AccountFailed {
                        account,
                        error: text.clone(),
                    });
                }
            }
            SyncFrame::Activity => {}
        }
    }

    fn report_session_error(&self, id: &CredentialId, error: &SessionError) {
        let credential = id.to_string();
        let message = match error {
            SessionError::CaptchaRequired => StatusMessage::CaptchaRequired { credential },
            SessionError::AuthenticationFailed(text) => StatusMessage::AuthenticationFailed {
                credential,
                error: text.clone(),
            },
            SessionError::Api(e) => StatusMessage::ConnectionError {
                credential,
                error: e.to_string(),
            },
            SessionError::Store(e) => {
                tracing::error!(credential = %id, error = %e, "Session cache failed");
                return;
            }
        };
        self.status.push(message);
    }

    fn report_connector_error(&self, id: &CredentialId, error: &ConnectorError) {
        let message = match error {
            ConnectorError::InvalidSubscription(text) => StatusMessage::InvalidSubscription {
                error: text.clone(),
            },
            ConnectorError::Connection(_)
            | ConnectorError::AuthRejected(_)
            | ConnectorError::InitRejected(_) => StatusMessage::ConnectionError {
                credential: id.to_string(),
                error: error.to_string(),
            },
        };
        self.status.push(message);
    }

    // -------------------------------------------------------------------------
    // Scan
    // -------------------------------------------------------------------------

    /// Run one auto-sync scan.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Store` when the credential list or the lock
    /// cannot be read. Failures of individual sets are part of the report.
    pub async fn scan_once(&self, cancel: &CancellationToken) -> Result<ScanReport, SyncError> {
        let now = self.clock.now();
        if !is_scan_window(now) {
            metrics::record_scan(ScanOutcome::OutsideWindow);
            tracing::debug!("Outside scan window");
            return Ok(ScanReport::OutsideWindow);
        }

        let attempts = self.credentials.attempts().await?;
        let due: Vec<CredentialId> = self
            .credentials
            .load_all()
            .await?
            .into_iter()
            .filter(|set| is_due(set.last_sync_time, now, self.settings.due_threshold))
            .filter(|set| {
                self.cool_down_remaining(attempts.get(&set.id).copied(), now)
                    .is_none()
            })
            .map(|set| set.id)
            .collect();
        if due.is_empty() {
            metrics::record_scan(ScanOutcome::NothingDue);
            return Ok(ScanReport::NothingDue);
        }

        if !self.lock.try_acquire().await? {
            metrics::record_scan(ScanOutcome::LockBusy);
            tracing::debug!("Sync lock busy, skipping scan");
            return Ok(ScanReport::LockBusy);
        }
        metrics::record_scan(ScanOutcome::Ran);
        tracing::info!(due = due.len(), "Auto-sync scan");

        let results = self.sync_due(due, cancel).await;

        self.lock.release().await?;
        Ok(ScanReport::Ran(results))
    }

    /// Sync `due` one after another while the lock stays ours. The caller
    /// holds the lock and releases it afterwards.
    async fn sync_due(
        &self,
        due: Vec<CredentialId>,
        cancel: &CancellationToken,
    ) -> Vec<(CredentialId, Result<SyncOutcome, SyncError>)> {
        let mut results = Vec::with_capacity(due.len());
        for (index, id) in due.into_iter().enumerate() {
            if index > 0 {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.settings.inter_credential_delay) => {}
                }
                match self.lock.try_acquire().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!("Lost sync lock mid-scan");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Refreshing sync lock failed, ending scan");
                        break;
                    }
                }
            }

            let result = match self.sync_credential(&id, cancel).await {
                Ok(SyncOutcome::StreamClosed) => self.reconnect(&id, cancel).await,
                other => other,
            };
            if let Err(e) = &result {
                tracing::warn!(credential = %id, error = %e, "Credential sync failed");
            }
            results.push((id, result));

            if cancel.is_cancelled() {
                break;
            }
        }
        results
    }

    /// Scan now and then every scan interval until cancelled.
    ///
    /// While another process holds the lock, the next scan starts as soon
    /// as the lock is released or expires.
    pub async fn run_auto_sync(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.settings.scan_interval.as_secs(),
            tab_id = %self.lock.tab_id(),
            "Auto-sync started"
        );

        loop {
            let report = match self.scan_once(&cancel).await {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::error!(error = %e, "Auto-sync scan failed");
                    None
                }
            };

            if matches!(report, Some(ScanReport::LockBusy)) {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    released = self.lock.wait_for_release(&cancel) => {
                        if let Err(e) = released {
                            tracing::warn!(error = %e, "Waiting for sync lock failed");
                            tokio::time::sleep(self.settings.inter_credential_delay).await;
                        }
                    }
                    () = tokio::time::sleep(self.settings.scan_interval) => {}
                }
            } else {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.settings.scan_interval) => {}
                }
            }
        }

        tracing::info!("Auto-sync stopped");
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("settings", &self.settings)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

fn settled_outcome(tracker: &ProgressTracker) -> SyncOutcome {
    SyncOutcome::Completed {
        orders: tracker.stats().total_orders,
        failed: tracker
            .accounts()
            .values()
            .filter(|p| !p.is_complete)
            .map(|p| p.account_id.clone())
            .collect(),
    }
}

/// Accounts to sync, or the `(added, removed)` difference that needs
/// confirmation.
///
/// With `all_accounts` every active provider account is synced. Otherwise
/// the selection must be non-empty and every selected account must still be
/// listed; new provider accounts are reported alongside.
fn resolve_accounts(
    set: &CredentialSet,
    provider: &[ProviderAccount],
) -> Result<Vec<String>, (Vec<String>, Vec<String>)> {
    let listed: BTreeSet<String> = provider
        .iter()
        .filter(|a| a.active)
        .map(|a| a.name.clone())
        .collect();

    if set.all_accounts {
        return Ok(listed.into_iter().collect());
    }

    let selected = &set.selected_account_ids;
    let removed: Vec<String> = selected.difference(&listed).cloned().collect();
    if removed.is_empty() && !selected.is_empty() {
        return Ok(selected.iter().cloned().collect());
    }

    let added = listed.difference(selected).cloned().collect();
    Err((added, removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credentials::CredentialFields;

    fn provider(names: &[&str]) -> Vec<ProviderAccount> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| ProviderAccount {
                id: i64::try_from(i).unwrap(),
                name: (*name).to_string(),
                active: true,
            })
            .collect()
    }

    fn set(selected: &[&str]) -> CredentialSet {
        CredentialSet::new(CredentialFields::new("trader01", "pw")).with_accounts(selected.iter().copied())
    }

    #[test]
    fn matching_selection_is_synced() {
        let accounts = resolve_accounts(&set(&["ACC1"]), &provider(&["ACC1", "ACC2"])).unwrap();
        assert_eq!(accounts, vec!["ACC1".to_string()]);
    }

    #[test]
    fn vanished_account_needs_confirmation() {
        let (added, removed) =
            resolve_accounts(&set(&["ACC1", "ACC3"]), &provider(&["ACC1", "ACC2"])).unwrap_err();
        assert_eq!(added, vec!["ACC2".to_string()]);
        assert_eq!(removed, vec!["ACC3".to_string()]);
    }

    #[test]
    fn empty_selection_needs_confirmation() {
        let (added, removed) = resolve_accounts(&set(&[]), &provider(&["ACC1"])).unwrap_err();
        assert_eq!(added, vec!["ACC1".to_string()]);
        assert!(removed.is_empty());
    }

    #[test]
    fn all_accounts_follows_provider() {
        let accounts =
            resolve_accounts(&set(&["OLD"]).with_all_accounts(), &provider(&["ACC1", "ACC2"]))
                .unwrap();
        assert_eq!(accounts, vec!["ACC1".to_string(), "ACC2".to_string()]);
    }

    #[test]
    fn inactive_accounts_are_not_listed() {
        let mut accounts = provider(&["ACC1", "ACC2"]);
        accounts[1].active = false;
        let accounts = resolve_accounts(&set(&["ACC1"]).with_all_accounts(), &accounts).unwrap();
        assert_eq!(accounts, vec!["ACC1".to_string()]);
    }

    #[test]
    fn default_settings_match_documented_values() {
        let settings = SyncSettings::default();
        assert_eq!(settings.idle_timeout, Duration::from_secs(15));
        assert_eq!(settings.inter_credential_delay, Duration::from_secs(5));
        assert_eq!(settings.reconnect.max_attempts, 3);
        assert_eq!(settings.backfill_days, 200);
    }
}
