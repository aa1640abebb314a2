//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (token endpoint, store, sync streams).
pub mod ports;

/// Application services for sessions, credentials, locking and sync runs.
pub mod services;
