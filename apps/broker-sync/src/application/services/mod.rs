//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SessionManager`: token acquisition, deferred-retry tickets, probe
//! - `CredentialRepository`: saved credential sets with merge-by-identity
//! - `SyncLockManager`: cross-process sync leader election
//! - `SyncOrchestrator`: auto-sync scan and per-credential runs
//! - `StatusBoard`: observable lifecycle signals and message log

mod credential_repository;
mod orchestrator;
mod session_manager;
mod session_store;
mod status;
mod sync_lock;

pub use credential_repository::{CREDENTIALS_KEY, CredentialRepository, SYNC_ATTEMPTS_KEY};
pub use orchestrator::{ScanReport, SyncError, SyncOrchestrator, SyncOutcome, SyncSettings};
pub use session_manager::{AuthenticatedSession, SessionError, SessionManager};
pub use session_store::{
    ACCOUNTS_KEY, DEVICE_ID_KEY, EXPIRATION_KEY, OWNER_KEY, SessionStore, TOKEN_KEY, USER_KEY,
};
pub use status::{
    ConnectionStatus, DEFAULT_MESSAGE_CAPACITY, LoggedMessage, StatusBoard, StatusMessage,
    StatusSnapshot, SyncPhase,
};
pub use sync_lock::{SYNC_LOCK_KEY, SyncLockManager};
