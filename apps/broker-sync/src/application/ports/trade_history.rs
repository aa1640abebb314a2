//! Local Trade History Port
//!
//! The surrounding application owns the trade database; the engine only
//! needs the most recent trade date per account to plan a backfill.

use async_trait::async_trait;
use chrono::NaiveDate;

use super::store::StoreError;

/// Read access to local trade history.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeHistory: Send + Sync {
    /// Date of the most recent local trade for `account`, if any.
    async fn latest_trade_date(&self, account: &str) -> Result<Option<NaiveDate>, StoreError>;
}
