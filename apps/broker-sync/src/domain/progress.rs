//! Backfill Progress Accounting
//!
//! Tracks per-account progress of a running sync from typed progress
//! events. The tracker enforces two rules:
//!
//! - the day cursor of an account never moves backwards within one run
//! - an account that reported completion is frozen
//!
//! Events that name an account outside the run are rejected with
//! [`ProgressError`] so the caller can log and drop them.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// =============================================================================
// Events
// =============================================================================

/// A typed progress event produced by a sync connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ProgressEvent {
    /// The server began processing an account.
    AccountStarted {
        /// Account identifier.
        account: String,
    },
    /// Total number of days the server will process for an account.
    ///
    /// When `account` is absent the total belongs to the most recently
    /// started account that does not have one yet.
    TotalDays {
        /// Account identifier, if the server named it.
        #[serde(default)]
        account: Option<String>,
        /// Number of days.
        total_days: u32,
    },
    /// One day of an account was processed.
    DayProgress {
        /// Account identifier.
        account: String,
        /// One-based day index.
        day: u32,
        /// Total days for the account.
        total_days: u32,
        /// Trading date that was processed.
        date: NaiveDate,
    },
    /// An account finished.
    AccountCompleted {
        /// Account identifier.
        account: String,
        /// Orders emitted for the account.
        orders: u64,
    },
    /// An account failed on the server side.
    AccountFailed {
        /// Account identifier.
        account: String,
        /// Server-provided error text.
        error: String,
    },
}

impl ProgressEvent {
    /// Account named by the event, if any.
    #[must_use]
    pub fn account(&self) -> Option<&str> {
        match self {
            Self::AccountStarted { account }
            | Self::DayProgress { account, .. }
            | Self::AccountCompleted { account, .. }
            | Self::AccountFailed { account, .. } => Some(account),
            Self::TotalDays { account, .. } => account.as_deref(),
        }
    }
}

// =============================================================================
// Per-Account State
// =============================================================================

/// Progress of one account within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProgress {
    /// Account identifier.
    pub account_id: String,
    /// Last processed day index (0 before the first day).
    pub current_day: u32,
    /// Total days expected, once announced.
    pub total_days: Option<u32>,
    /// Date of the last processed day.
    pub current_date: Option<NaiveDate>,
    /// Whether the account completed.
    pub is_complete: bool,
    /// Orders emitted, set on completion.
    pub orders: u64,
    /// Last error recorded for the account.
    pub error: Option<String>,
}

impl AccountProgress {
    fn new(account_id: String) -> Self {
        Self {
            account_id,
            ..Self::default()
        }
    }

    /// Whether the account is done, successfully or not.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.is_complete || self.error.is_some()
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    /// Orders emitted across completed accounts.
    pub total_orders: u64,
    /// Accounts that completed.
    pub accounts_completed: u32,
    /// Accounts that failed.
    pub accounts_failed: u32,
    /// Frames accepted by the tracker.
    pub frames_processed: u64,
    /// Frames dropped because they could not be resolved.
    pub frames_dropped: u64,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of applying an event that named a known account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// State changed.
    Applied,
    /// Day index went backwards; event ignored.
    StaleDay,
    /// Account already finished; event ignored.
    AlreadySettled,
}

/// Events the tracker could not attribute to an account.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    /// The event named an account that is not part of this run.
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    /// A total-days announcement arrived with no started account lacking a total.
    #[error("total days announcement ({0}) has no matching account")]
    UnmatchedTotal(u32),
}

// =============================================================================
// Tracker
// =============================================================================

/// Progress of every account in one run.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    accounts: BTreeMap<String, AccountProgress>,
    started: Vec<String>,
    stats: ProcessingStats,
}

impl ProgressTracker {
    /// Start tracking a run over `accounts`; any previous state is discarded.
    #[must_use]
    pub fn new<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let accounts = accounts
            .into_iter()
            .map(Into::into)
            .map(|id: String| (id.clone(), AccountProgress::new(id)))
            .collect();

        Self {
            accounts,
            started: Vec::new(),
            stats: ProcessingStats::default(),
        }
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError`] when the event cannot be attributed to an
    /// account of this run. The tracker is left unchanged apart from the
    /// dropped-frame counter.
    pub fn apply(&mut self, event: ProgressEvent) -> Result<ProgressUpdate, ProgressError> {
        let result = self.apply_inner(event);
        match result {
            Ok(_) => self.stats.frames_processed += 1,
            Err(_) => self.stats.frames_dropped += 1,
        }
        result
    }

    fn apply_inner(&mut self, event: ProgressEvent) -> Result<ProgressUpdate, ProgressError> {
        match event {
            ProgressEvent::AccountStarted { account } => {
                let progress = self.known_mut(&account)?;
                if progress.is_settled() {
                    return Ok(ProgressUpdate::AlreadySettled);
                }
                self.mark_started(&account);
                Ok(ProgressUpdate::Applied)
            }
            ProgressEvent::TotalDays {
                account: Some(account),
                total_days,
            } => {
                let progress = self.known_mut(&account)?;
                if progress.is_settled() {
                    return Ok(ProgressUpdate::AlreadySettled);
                }
                progress.total_days = Some(total_days);
                Ok(ProgressUpdate::Applied)
            }
            ProgressEvent::TotalDays {
                account: None,
                total_days,
            } => {
                let target = self
                    .started
                    .iter()
                    .rev()
                    .find(|id| {
                        self.accounts
                            .get(*id)
                            .is_some_and(|p| p.total_days.is_none() && !p.is_settled())
                    })
                    .cloned()
                    .ok_or(ProgressError::UnmatchedTotal(total_days))?;

                if let Some(progress) = self.accounts.get_mut(&target) {
                    progress.total_days = Some(total_days);
                }
                Ok(ProgressUpdate::Applied)
            }
            ProgressEvent::DayProgress {
                account,
                day,
                total_days,
                date,
            } => {
                let progress = self.known_mut(&account)?;
                if progress.is_settled() {
                    return Ok(ProgressUpdate::AlreadySettled);
                }
                if day < progress.current_day {
                    return Ok(ProgressUpdate::StaleDay);
                }
                progress.current_day = day;
                progress.current_date = Some(date);
                if total_days > 0 {
                    progress.total_days = Some(total_days);
                }
                self.mark_started(&account);
                Ok(ProgressUpdate::Applied)
            }
            ProgressEvent::AccountCompleted { account, orders } => {
                let progress = self.known_mut(&account)?;
                if progress.is_settled() {
                    return Ok(ProgressUpdate::AlreadySettled);
                }
                progress.is_complete = true;
                progress.orders = orders;
                if let Some(total) = progress.total_days {
                    progress.current_day = progress.current_day.max(total);
                }
                self.stats.total_orders += orders;
                self.stats.accounts_completed += 1;
                Ok(ProgressUpdate::Applied)
            }
            ProgressEvent::AccountFailed { account, error } => {
                let progress = self.known_mut(&account)?;
                if progress.is_settled() {
                    return Ok(ProgressUpdate::AlreadySettled);
                }
                progress.error = Some(error);
                self.stats.accounts_failed += 1;
                Ok(ProgressUpdate::Applied)
            }
        }
    }

    fn known_mut(&mut self, account: &str) -> Result<&mut AccountProgress, ProgressError> {
        self.accounts
            .get_mut(account)
            .ok_or_else(|| ProgressError::UnknownAccount(account.to_string()))
    }

    fn mark_started(&mut self, account: &str) {
        self.started.retain(|id| id != account);
        self.started.push(account.to_string());
    }

    /// Mark every unsettled account failed with `error`.
    ///
    /// Returns the accounts that were marked.
    pub fn fail_in_flight(&mut self, error: &str) -> Vec<String> {
        let mut failed = Vec::new();
        for progress in self.accounts.values_mut() {
            if !progress.is_settled() {
                progress.error = Some(error.to_string());
                failed.push(progress.account_id.clone());
            }
        }
        self.stats.accounts_failed += u32::try_from(failed.len()).unwrap_or(u32::MAX);
        failed
    }

    /// Whether every account completed successfully.
    #[must_use]
    pub fn is_all_complete(&self) -> bool {
        !self.accounts.is_empty() && self.accounts.values().all(|p| p.is_complete)
    }

    /// Whether every account is complete or failed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.accounts.values().all(AccountProgress::is_settled)
    }

    /// Progress of one account.
    #[must_use]
    pub fn account(&self, account: &str) -> Option<&AccountProgress> {
        self.accounts.get(account)
    }

    /// Progress of every account, keyed by account id.
    #[must_use]
    pub const fn accounts(&self) -> &BTreeMap<String, AccountProgress> {
        &self.accounts
    }

    /// Aggregate counters.
    #[must_use]
    pub const fn stats(&self) -> ProcessingStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn day(account: &str, n: u32) -> ProgressEvent {
        ProgressEvent::DayProgress {
            account: account.to_string(),
            day: n,
            total_days: 20,
            date: date(n.clamp(1, 28)),
        }
    }

    #[test]
    fn unnamed_total_goes_to_most_recent_started_account() {
        let mut tracker = ProgressTracker::new(["ACC1", "ACC2"]);
        tracker
            .apply(ProgressEvent::AccountStarted {
                account: "ACC1".into(),
            })
            .unwrap();
        tracker
            .apply(ProgressEvent::TotalDays {
                account: None,
                total_days: 12,
            })
            .unwrap();
        tracker
            .apply(ProgressEvent::AccountStarted {
                account: "ACC2".into(),
            })
            .unwrap();
        tracker
            .apply(ProgressEvent::TotalDays {
                account: None,
                total_days: 30,
            })
            .unwrap();

        assert_eq!(tracker.account("ACC1").unwrap().total_days, Some(12));
        assert_eq!(tracker.account("ACC2").unwrap().total_days, Some(30));
    }

    #[test]
    fn unnamed_total_without_candidate_is_rejected() {
        let mut tracker = ProgressTracker::new(["ACC1"]);
        let err = tracker
            .apply(ProgressEvent::TotalDays {
                account: None,
                total_days: 5,
            })
            .unwrap_err();
        assert_eq!(err, ProgressError::UnmatchedTotal(5));
        assert_eq!(tracker.stats().frames_dropped, 1);
    }

    #[test]
    fn stale_day_is_ignored() {
        let mut tracker = ProgressTracker::new(["ACC1"]);
        assert_eq!(tracker.apply(day("ACC1", 5)).unwrap(), ProgressUpdate::Applied);
        assert_eq!(tracker.apply(day("ACC1", 3)).unwrap(), ProgressUpdate::StaleDay);

        let progress = tracker.account("ACC1").unwrap();
        assert_eq!(progress.current_day, 5);
        assert_eq!(progress.current_date, Some(date(5)));
    }

    #[test]
    fn repeated_day_is_accepted() {
        let mut tracker = ProgressTracker::new(["ACC1"]);
        tracker.apply(day("ACC1", 4)).unwrap();
        assert_eq!(tracker.apply(day("ACC1", 4)).unwrap(), ProgressUpdate::Applied);
    }

    #[test]
    fn completion_freezes_account_and_rolls_up_orders() {
        let mut tracker = ProgressTracker::new(["ACC1", "ACC2"]);
        tracker.apply(day("ACC1", 2)).unwrap();
        tracker
            .apply(ProgressEvent::AccountCompleted {
                account: "ACC1".into(),
                orders: 17,
            })
            .unwrap();
        tracker
            .apply(ProgressEvent::AccountCompleted {
                account: "ACC2".into(),
                orders: 3,
            })
            .unwrap();

        assert_eq!(
            tracker.apply(day("ACC1", 9)).unwrap(),
            ProgressUpdate::AlreadySettled
        );
        assert_eq!(tracker.account("ACC1").unwrap().current_day, 20);
        assert_eq!(tracker.stats().total_orders, 20);
        assert_eq!(tracker.stats().accounts_completed, 2);
        assert!(tracker.is_all_complete());
    }

    #[test]
    fn unknown_account_is_rejected_without_side_effects() {
        let mut tracker = ProgressTracker::new(["ACC1"]);
        let err = tracker.apply(day("NOPE", 1)).unwrap_err();
        assert_eq!(err, ProgressError::UnknownAccount("NOPE".into()));
        assert_eq!(tracker.account("ACC1").unwrap().current_day, 0);
    }

    #[test]
    fn failed_account_does_not_block_siblings() {
        let mut tracker = ProgressTracker::new(["ACC1", "ACC2"]);
        tracker
            .apply(ProgressEvent::AccountFailed {
                account: "ACC1".into(),
                error: "no permission".into(),
            })
            .unwrap();
        tracker
            .apply(ProgressEvent::AccountCompleted {
                account: "ACC2".into(),
                orders: 1,
            })
            .unwrap();

        assert!(tracker.is_settled());
        assert!(!tracker.is_all_complete());
        assert_eq!(tracker.stats().accounts_failed, 1);
    }

    #[test]
    fn fail_in_flight_marks_only_unsettled_accounts() {
        let mut tracker = ProgressTracker::new(["ACC1", "ACC2"]);
        tracker
            .apply(ProgressEvent::AccountCompleted {
                account: "ACC1".into(),
                orders: 2,
            })
            .unwrap();
        tracker.apply(day("ACC2", 3)).unwrap();

        let failed = tracker.fail_in_flight("idle timeout");

        assert_eq!(failed, vec!["ACC2".to_string()]);
        assert!(tracker.account("ACC1").unwrap().error.is_none());
        assert_eq!(tracker.account("ACC2").unwrap().current_day, 3);
    }

    #[test]
    fn events_decode_from_tagged_json() {
        let event: ProgressEvent = serde_json::from_str(
            r#"{"type":"dayProgress","account":"ACC1","day":3,"totalDays":9,"date":"2024-03-03"}"#,
        )
        .unwrap();
        assert_eq!(event, day_with_total("ACC1", 3, 9));
    }

    fn day_with_total(account: &str, n: u32, total: u32) -> ProgressEvent {
        ProgressEvent::DayProgress {
            account: account.to_string(),
            day: n,
            total_days: total,
            date: date(n),
        }
    }

    proptest! {
        #[test]
        fn recorded_day_never_decreases(days in proptest::collection::vec(0_u32..50, 1..64)) {
            let mut tracker = ProgressTracker::new(["ACC1"]);
            let mut previous = 0;
            for n in days {
                tracker.apply(day("ACC1", n)).unwrap();
                let current = tracker.account("ACC1").unwrap().current_day;
                prop_assert!(current >= previous);
                previous = current;
            }
        }
    }
}
