//! Sync Scheduling Rules
//!
//! Pure functions deciding when a credential set is due and where the
//! backfill of each account starts.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};

/// Days of history fetched for an account with no local trades.
pub const DEFAULT_BACKFILL_DAYS: u64 = 200;

/// Start date for one account's backfill.
///
/// With no local history the backfill reaches `backfill_days` before
/// `today`; otherwise it resumes the day after the latest local trade.
#[must_use]
pub fn backfill_start(
    latest_local_trade: Option<NaiveDate>,
    today: NaiveDate,
    backfill_days: u64,
) -> NaiveDate {
    match latest_local_trade {
        Some(latest) => latest.succ_opt().unwrap_or(latest),
        None => today
            .checked_sub_days(Days::new(backfill_days))
            .unwrap_or(NaiveDate::MIN),
    }
}

/// Start dates for a set of accounts plus the earliest of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillPlan {
    /// Start date per account.
    pub per_account: BTreeMap<String, NaiveDate>,
    /// Earliest start across accounts; this is what the init frame carries.
    pub start_date: NaiveDate,
}

impl BackfillPlan {
    /// Build a plan from each account's latest local trade date.
    ///
    /// Returns `None` when `latest` is empty.
    #[must_use]
    pub fn build(
        latest: &BTreeMap<String, Option<NaiveDate>>,
        today: NaiveDate,
        backfill_days: u64,
    ) -> Option<Self> {
        let per_account: BTreeMap<String, NaiveDate> = latest
            .iter()
            .map(|(account, last)| (account.clone(), backfill_start(*last, today, backfill_days)))
            .collect();
        let start_date = per_account.values().min().copied()?;

        Some(Self {
            per_account,
            start_date,
        })
    }
}

/// Format a date the way the sync init frame expects (`YYYYMMDD`).
#[must_use]
pub fn format_wire_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Whether auto-sync scans run at `now`.
///
/// Scans are skipped on Saturday and Sunday (UTC), when the provider
/// produces no new fills.
#[must_use]
pub fn is_scan_window(now: DateTime<Utc>) -> bool {
    !matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Whether a credential last synced at `last_sync` is due at `now`.
///
/// A set that never synced is always due.
#[must_use]
pub fn is_due(last_sync: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold: Duration) -> bool {
    last_sync.is_none_or(|last| (now - last).to_std().is_ok_and(|elapsed| elapsed >= threshold))
}
