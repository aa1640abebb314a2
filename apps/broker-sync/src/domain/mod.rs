//! Domain Layer - Core sync types and rules.
//!
//! Pure types and decision functions with no I/O: credential identity and
//! merging, session validity, progress accounting, lock arbitration and
//! scheduling.

/// Real-time channel kinds and endpoint scopes.
pub mod channel;

/// Saved credential sets.
pub mod credentials;

/// Cross-process sync lock record.
pub mod lock;

/// Per-account backfill progress.
pub mod progress;

/// Due checks, scan window and backfill start dates.
pub mod schedule;

/// Session tokens and provider accounts.
pub mod session;
