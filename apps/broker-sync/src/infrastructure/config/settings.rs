//! Broker Sync Configuration Settings
//!
//! Configuration types for the sync engine, loaded from environment
//! variables. Every loader takes a lookup function so tests never touch
//! the process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::ports::AppIdentity;
use crate::application::services::SyncSettings;
use crate::domain::lock::LOCK_TIMEOUT;
use crate::infrastructure::transport::TransportConfig;

const DEFAULT_STORAGE_DIR: &str = "./.broker-sync";
const DEFAULT_STATUS_PORT: u16 = 8090;

/// Provider environment (demo vs live).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Simulated trading.
    #[default]
    Demo,
    /// Real money.
    Live,
}

impl Environment {
    /// Parse environment from string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for anything but `demo` or `live`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "demo" => Ok(Self::Demo),
            "live" => Ok(Self::Live),
            _ => Err(ConfigError::InvalidValue {
                key: "BROKER_SYNC_ENV".to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Check if this is the live environment.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Live => "live",
        }
    }

    const fn var_prefix(self) -> &'static str {
        match self {
            Self::Demo => "BROKER_SYNC_DEMO",
            Self::Live => "BROKER_SYNC_LIVE",
        }
    }
}

/// Provider endpoints for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Duplex endpoint for accounts, orders and sync.
    pub general_url: String,
    /// Duplex endpoint for market data.
    pub market_data_url: String,
    /// HTTP auth base URL.
    pub auth_url: String,
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Provider environment.
    pub environment: Environment,
    /// Endpoints for `environment`.
    pub endpoints: Endpoints,
    /// Application identity sent with token requests.
    pub app: AppIdentity,
    /// Directory of the shared file store.
    pub storage_dir: PathBuf,
    /// Port of the status HTTP server.
    pub status_port: u16,
    /// Orchestrator timings.
    pub sync: SyncSettings,
    /// Age at which a sync lock may be reclaimed.
    pub lock_timeout: Duration,
    /// Duplex transport settings.
    pub transport: TransportConfig,
}

impl SyncConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// empty, or `BROKER_SYNC_ENV` is not `demo` or `live`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`SyncConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("BROKER_SYNC_ENV")
            .map(|value| Environment::parse(&value))
            .transpose()?
            .unwrap_or_default();

        let prefix = environment.var_prefix();
        let endpoints = Endpoints {
            general_url: required(&lookup, &format!("{prefix}_GENERAL_URL"))?,
            market_data_url: required(&lookup, &format!("{prefix}_MD_URL"))?,
            auth_url: required(&lookup, &format!("{prefix}_AUTH_URL"))?,
        };

        let app = AppIdentity {
            app_id: lookup("BROKER_SYNC_APP_ID").unwrap_or_default(),
            app_version: lookup("BROKER_SYNC_APP_VERSION").unwrap_or_default(),
            cid: lookup("BROKER_SYNC_CID").unwrap_or_default(),
            sec: lookup("BROKER_SYNC_SEC").unwrap_or_default(),
        };

        let defaults = SyncSettings::default();
        let mut reconnect = defaults.reconnect.clone();
        reconnect.max_attempts = parse_or(&lookup, "BROKER_SYNC_RECONNECT_ATTEMPTS", reconnect.max_attempts);
        reconnect.initial_delay = millis_or(
            &lookup,
            "BROKER_SYNC_RECONNECT_INITIAL_DELAY_MS",
            reconnect.initial_delay,
        );

        let sync = SyncSettings {
            scan_interval: secs_or(&lookup, "BROKER_SYNC_SCAN_INTERVAL_SECS", defaults.scan_interval),
            due_threshold: secs_or(&lookup, "BROKER_SYNC_DUE_THRESHOLD_SECS", defaults.due_threshold),
            cool_down: secs_or(&lookup, "BROKER_SYNC_COOL_DOWN_SECS", defaults.cool_down),
            inter_credential_delay: secs_or(
                &lookup,
                "BROKER_SYNC_INTER_CREDENTIAL_DELAY_SECS",
                defaults.inter_credential_delay,
            ),
            idle_timeout: secs_or(&lookup, "BROKER_SYNC_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            max_duration: secs_or(&lookup, "BROKER_SYNC_MAX_DURATION_SECS", defaults.max_duration),
            backfill_days: parse_or(&lookup, "BROKER_SYNC_BACKFILL_DAYS", defaults.backfill_days),
            reconnect,
        };

        let transport_defaults = TransportConfig::default();
        let transport = TransportConfig {
            heartbeat_quiet: millis_or(
                &lookup,
                "BROKER_SYNC_HEARTBEAT_QUIET_MS",
                transport_defaults.heartbeat_quiet,
            ),
            ..transport_defaults
        };

        Ok(Self {
            environment,
            endpoints,
            app,
            storage_dir: lookup("BROKER_SYNC_STORAGE_DIR")
                .filter(|dir| !dir.is_empty())
                .map_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR), PathBuf::from),
            status_port: parse_or(&lookup, "BROKER_SYNC_STATUS_PORT", DEFAULT_STATUS_PORT),
            sync,
            lock_timeout: secs_or(&lookup, "BROKER_SYNC_LOCK_TIMEOUT_SECS", LOCK_TIMEOUT),
            transport,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value outside its domain.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn millis_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    const DEMO: &[(&str, &str)] = &[
        ("BROKER_SYNC_DEMO_GENERAL_URL", "wss://demo.example/ws"),
        ("BROKER_SYNC_DEMO_MD_URL", "wss://md-demo.example/ws"),
        ("BROKER_SYNC_DEMO_AUTH_URL", "https://demo.example/v1"),
    ];

    #[test]
    fn demo_is_default_environment() {
        let config = SyncConfig::from_lookup(lookup_from(DEMO)).unwrap();

        assert_eq!(config.environment, Environment::Demo);
        assert_eq!(config.endpoints.general_url, "wss://demo.example/ws");
        assert_eq!(config.storage_dir, PathBuf::from("./.broker-sync"));
        assert_eq!(config.status_port, 8090);
        assert_eq!(config.lock_timeout, Duration::from_secs(300));
        assert_eq!(config.sync.idle_timeout, Duration::from_secs(15));
        assert_eq!(config.sync.reconnect.max_attempts, 3);
        assert_eq!(config.transport.heartbeat_quiet, Duration::from_millis(2500));
    }

    #[test]
    fn live_reads_live_endpoints() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("BROKER_SYNC_ENV", "LIVE"),
            ("BROKER_SYNC_LIVE_GENERAL_URL", "wss://live.example/ws"),
            ("BROKER_SYNC_LIVE_MD_URL", "wss://md.example/ws"),
            ("BROKER_SYNC_LIVE_AUTH_URL", "https://live.example/v1"),
        ]))
        .unwrap();

        assert!(config.environment.is_live());
        assert_eq!(config.endpoints.market_data_url, "wss://md.example/ws");
    }

    #[test]
    fn missing_endpoint_is_reported() {
        let err = SyncConfig::from_lookup(lookup_from(&DEMO[..2])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "BROKER_SYNC_DEMO_AUTH_URL"));
    }

    #[test]
    fn empty_endpoint_is_reported() {
        let mut pairs = DEMO.to_vec();
        pairs[0].1 = " ";
        let err = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn unknown_environment_is_invalid() {
        let mut pairs = DEMO.to_vec();
        pairs.push(("BROKER_SYNC_ENV", "staging"));
        assert!(matches!(
            SyncConfig::from_lookup(lookup_from(&pairs)),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test_case("BROKER_SYNC_IDLE_TIMEOUT_SECS", "30" ; "idle timeout")]
    #[test_case("BROKER_SYNC_LOCK_TIMEOUT_SECS", "60" ; "lock timeout")]
    #[test_case("BROKER_SYNC_RECONNECT_INITIAL_DELAY_MS", "250" ; "reconnect delay")]
    #[test_case("BROKER_SYNC_HEARTBEAT_QUIET_MS", "1000" ; "heartbeat")]
    fn timing_overrides_apply(key: &str, value: &str) {
        let mut pairs = DEMO.to_vec();
        pairs.push((key, value));
        let config = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap();

        let actual = match key {
            "BROKER_SYNC_IDLE_TIMEOUT_SECS" => config.sync.idle_timeout,
            "BROKER_SYNC_LOCK_TIMEOUT_SECS" => config.lock_timeout,
            "BROKER_SYNC_RECONNECT_INITIAL_DELAY_MS" => config.sync.reconnect.initial_delay,
            _ => config.transport.heartbeat_quiet,
        };
        let n: u64 = value.parse().unwrap();
        let expected = if key.ends_with("_MS") {
            Duration::from_millis(n)
        } else {
            Duration::from_secs(n)
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn unparsable_override_keeps_default() {
        let mut pairs = DEMO.to_vec();
        pairs.push(("BROKER_SYNC_STATUS_PORT", "eighty"));
        let config = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.status_port, 8090);
    }

    #[test]
    fn app_identity_is_read() {
        let mut pairs = DEMO.to_vec();
        pairs.push(("BROKER_SYNC_APP_ID", "broker-sync"));
        pairs.push(("BROKER_SYNC_CID", "8"));
        let config = SyncConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.app.app_id, "broker-sync");
        assert_eq!(config.app.cid, "8");
        assert_eq!(config.app.sec, "");
    }
}
