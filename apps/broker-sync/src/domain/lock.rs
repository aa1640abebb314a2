//! Sync Lock Record
//!
//! The sync lock elects one process ("tab") as sync leader for a scan
//! cycle. It is a single timestamped owner record kept in the shared
//! key-value store. The lock is advisory: a holder that dies without
//! releasing it is reclaimed once the record is older than the timeout.
//!
//! Two processes racing inside the same store write can both believe they
//! won. The result is a duplicate sync of the same credentials, which the
//! per-credential cool-down and idempotent backfill absorb.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Age after which a lock record is considered abandoned.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Stored lock record.
///
/// # Wire Format (JSON)
/// ```json
/// {"tabId":"5b0c...","timestamp":1710072000000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLockRecord {
    /// Owner process id.
    pub tab_id: String,
    /// Acquisition time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl SyncLockRecord {
    /// Create a record owned by `tab_id` acquired at `now`.
    #[must_use]
    pub fn new(tab_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            tab_id: tab_id.into(),
            timestamp: now,
        }
    }

    /// Whether the record has reached `timeout` at `now`.
    ///
    /// A record dated in the future (clock skew between processes) is
    /// treated as fresh.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        (now - self.timestamp)
            .to_std()
            .is_ok_and(|age| age >= timeout)
    }
}

/// Decide whether `tab_id` may take the lock given the current record.
///
/// Rules, in order:
/// 1. no record: acquirable
/// 2. record owned by `tab_id`: acquirable (re-entrant refresh)
/// 3. record at or past the timeout: acquirable (reclaim)
/// 4. otherwise: held by someone else
#[must_use]
pub fn can_acquire(
    current: Option<&SyncLockRecord>,
    tab_id: &str,
    now: DateTime<Utc>,
    timeout: Duration,
) -> bool {
    match current {
        None => true,
        Some(record) if record.tab_id == tab_id => true,
        Some(record) => record.is_expired(now, timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, 14, 0, 0).unwrap()
    }

    #[test]
    fn empty_slot_is_acquirable() {
        assert!(can_acquire(None, "tab-a", now(), LOCK_TIMEOUT));
    }

    #[test]
    fn own_lock_is_reacquirable() {
        let record = SyncLockRecord::new("tab-a", now());
        assert!(can_acquire(Some(&record), "tab-a", now(), LOCK_TIMEOUT));
    }

    #[test]
    fn future_dated_record_is_fresh() {
        let record = SyncLockRecord::new("tab-b", now() + chrono::Duration::minutes(10));
        assert!(!can_acquire(Some(&record), "tab-a", now(), LOCK_TIMEOUT));
    }

    #[test]
    fn record_serializes_with_millisecond_timestamp() {
        let record = SyncLockRecord::new("tab-a", now());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["tabId"], "tab-a");
        assert_eq!(json["timestamp"], now().timestamp_millis());
    }

    proptest! {
        #[test]
        fn stale_lock_is_always_reclaimable(extra_secs in 0_i64..86_400) {
            let acquired = now() - chrono::Duration::seconds(300 + extra_secs);
            let record = SyncLockRecord::new("tab-b", acquired);
            prop_assert!(can_acquire(Some(&record), "tab-a", now(), LOCK_TIMEOUT));
        }

        #[test]
        fn live_foreign_lock_is_never_acquirable(age_secs in 0_i64..300) {
            let acquired = now() - chrono::Duration::seconds(age_secs);
            let record = SyncLockRecord::new("tab-b", acquired);
            prop_assert!(!can_acquire(Some(&record), "tab-a", now(), LOCK_TIMEOUT));
        }
    }
}
