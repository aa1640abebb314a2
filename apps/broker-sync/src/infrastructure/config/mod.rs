//! Configuration Module
//!
//! Configuration loading for the sync engine.

mod settings;

pub use settings::{ConfigError, Endpoints, Environment, SyncConfig};
