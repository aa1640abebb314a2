//! Port Interfaces
//!
//! Contracts between the sync services and the outside world, following
//! the Hexagonal Architecture pattern. Infrastructure adapters implement
//! these.
//!
//! ## Driven Ports (Outbound)
//!
//! - `KeyValueStore`: shared per-profile storage (session, credentials, lock)
//! - `AuthApi`: provider token endpoint and account listing
//! - `SyncConnector`: account-sync streams
//! - `TradeHistory`: latest local trade date per account
//! - `Clock`: wall-clock time

mod auth_api;
mod clock;
mod store;
mod sync_connector;
mod trade_history;

pub use auth_api::{ApiError, AppIdentity, AuthApi, TokenOutcome, TokenRequest, TokenResponse};
#[cfg(test)]
pub use auth_api::MockAuthApi;
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{KeyValueStore, StorageChange, StoreError, read_json, write_json};
pub use sync_connector::{ConnectorError, SyncConnection, SyncConnector, SyncFrame, SyncInit};
#[cfg(test)]
pub use trade_history::MockTradeHistory;
pub use trade_history::TradeHistory;
