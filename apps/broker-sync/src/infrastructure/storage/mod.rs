//! Key-Value Store Adapters
//!
//! - [`MemoryStore`]: one process, tests
//! - [`FileStore`]: processes sharing a directory
//! - [`StoredTradeHistory`]: trade-history port over either store

mod file;
mod memory;
mod trade_history;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use trade_history::{LATEST_TRADES_KEY, StoredTradeHistory};

/// Buffered change notifications per subscriber.
const CHANGE_CAPACITY: usize = 256;
