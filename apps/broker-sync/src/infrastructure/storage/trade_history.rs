//! Trade history read from the shared store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::application::ports::{KeyValueStore, StoreError, TradeHistory, read_json};

/// Key under which the surrounding application records the latest trade
/// date of each account, as `{"ACC1": "2024-03-10"}`.
pub const LATEST_TRADES_KEY: &str = "broker-sync.latest-trade-dates";

/// [`TradeHistory`] backed by the shared key-value store.
#[derive(Clone)]
pub struct StoredTradeHistory {
    store: Arc<dyn KeyValueStore>,
}

impl StoredTradeHistory {
    /// Create a reader over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TradeHistory for StoredTradeHistory {
    async fn latest_trade_date(&self, account: &str) -> Result<Option<NaiveDate>, StoreError> {
        let dates: Option<BTreeMap<String, NaiveDate>> =
            read_json(self.store.as_ref(), LATEST_TRADES_KEY).await?;
        Ok(dates.and_then(|dates| dates.get(account).copied()))
    }
}

impl std::fmt::Debug for StoredTradeHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTradeHistory").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::MemoryStore;

    #[tokio::test]
    async fn reads_per_account_dates() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(LATEST_TRADES_KEY, r#"{"ACC1":"2024-03-10"}"#)
            .await
            .unwrap();
        let history = StoredTradeHistory::new(store);

        assert_eq!(
            history.latest_trade_date("ACC1").await.unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 10)
        );
        assert_eq!(history.latest_trade_date("ACC2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_record_means_no_history() {
        let history = StoredTradeHistory::new(Arc::new(MemoryStore::new()));
        assert_eq!(history.latest_trade_date("ACC1").await.unwrap(), None);
    }
}
