#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Broker Sync - Resumable Broker Synchronization Engine
//!
//! Authenticates against a trading-data provider, holds a correlated
//! request/response duplex connection, and drives resumable historical
//! backfill for every saved credential set. Processes sharing a store
//! elect one sync leader through an advisory lock.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `credentials`: Credential identity, merge and dedupe
//!   - `session`: Token validity, provider accounts
//!   - `progress`: Per-account progress accounting
//!   - `lock`: Sync lock record and arbitration
//!   - `schedule`: Scan window, due checks, backfill start dates
//!   - `channel`: Channel kinds and endpoint scopes
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Token endpoint, key-value store, sync streams, clock
//!   - `services`: Sessions, credentials, sync lock, orchestrator, status
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `transport`: Duplex WebSocket client and frame codec
//!   - `subscription`: Real-time channel subscriptions
//!   - `sync_stream`: Account-sync stream adapter
//!   - `http`: Token endpoint client
//!   - `storage`: Memory and file key-value stores
//!   - `config`: Environment configuration
//!   - `status_server`: Status, liveness and metrics endpoint
//!
//! # Data Flow
//!
//! ```text
//! scan ──► SyncLock ──► SessionManager ──► HTTP auth
//!                           │
//!                           ▼
//!          SyncOrchestrator ──► SyncConnector ──► Transport ◄──► provider
//!                           │
//!                           ▼
//!                      StatusBoard ──► /status
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core sync types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::channel::{ChannelKind, EndpointScope};
pub use domain::credentials::{CredentialFields, CredentialId, CredentialSet};
pub use domain::progress::{AccountProgress, ProcessingStats, ProgressEvent, ProgressTracker};
pub use domain::session::{ProviderAccount, Session};

// Ports
pub use application::ports::{
    Clock, ConnectorError, KeyValueStore, ManualClock, SyncConnection, SyncConnector, SyncFrame,
    SyncInit, SystemClock, TradeHistory,
};

// Services
pub use application::services::{
    CredentialRepository, ScanReport, SessionManager, SessionStore, StatusBoard, StatusMessage,
    SyncError, SyncLockManager, SyncOrchestrator, SyncOutcome, SyncSettings,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, Endpoints, Environment, SyncConfig};

// Transport and subscriptions (for integration tests)
pub use infrastructure::subscription::{
    ChannelItem, SubscriptionError, SubscriptionHandle, SubscriptionManager,
};
pub use infrastructure::transport::{
    ConnectionState, Transport, TransportClient, TransportConfig, TransportError,
};

// Adapters
pub use infrastructure::http::HttpAuthApi;
pub use infrastructure::storage::{FileStore, MemoryStore, StoredTradeHistory};
pub use infrastructure::sync_stream::TransportSyncConnector;

// Status server
pub use infrastructure::status_server::{StatusServer, StatusServerError, StatusServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
