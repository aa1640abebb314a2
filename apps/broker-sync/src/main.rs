//! Broker Sync Binary
//!
//! Runs the auto-sync loop and the status server until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin broker-sync
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BROKER_SYNC_{DEMO,LIVE}_GENERAL_URL`: General duplex endpoint
//! - `BROKER_SYNC_{DEMO,LIVE}_MD_URL`: Market-data duplex endpoint
//! - `BROKER_SYNC_{DEMO,LIVE}_AUTH_URL`: HTTP auth base URL
//!
//! ## Optional
//! - `BROKER_SYNC_ENV`: demo | live (default: demo)
//! - `BROKER_SYNC_APP_ID`, `BROKER_SYNC_APP_VERSION`, `BROKER_SYNC_CID`, `BROKER_SYNC_SEC`
//! - `BROKER_SYNC_STORAGE_DIR`: Shared store directory (default: ./.broker-sync)
//! - `BROKER_SYNC_STATUS_PORT`: Status HTTP port (default: 8090)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: broker-sync)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use broker_sync::application::ports::KeyValueStore;
use broker_sync::infrastructure::telemetry;
use broker_sync::{
    Clock, CredentialRepository, FileStore, HttpAuthApi, SessionManager, SessionStore, StatusBoard,
    StatusServer, StatusServerState, StoredTradeHistory, SyncConfig, SyncLockManager,
    SyncOrchestrator, SystemClock, TransportSyncConnector, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Broker Sync");

    let _metrics_handle = init_metrics()?;

    let config = SyncConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&config.storage_dir)
            .await
            .with_context(|| format!("opening store at {}", config.storage_dir.display()))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let board = Arc::new(StatusBoard::new(Arc::clone(&clock)));

    let auth_api = Arc::new(HttpAuthApi::new(config.endpoints.auth_url.clone())?);
    let sessions = Arc::new(
        SessionManager::new(
            auth_api,
            SessionStore::new(Arc::clone(&store)),
            Arc::clone(&clock),
            config.app.clone(),
        )
        .with_status_board(Arc::clone(&board)),
    );

    let tab_id = uuid::Uuid::new_v4().to_string();
    let lock = SyncLockManager::new(Arc::clone(&store), Arc::clone(&clock), tab_id)
        .with_timeout(config.lock_timeout);

    let orchestrator = Arc::new(SyncOrchestrator::new(
        CredentialRepository::new(Arc::clone(&store)),
        sessions,
        Arc::new(TransportSyncConnector::new(
            config.endpoints.general_url.clone(),
            config.transport.clone(),
        )),
        Arc::new(StoredTradeHistory::new(Arc::clone(&store))),
        lock,
        Arc::clone(&board),
        clock,
        config.sync.clone(),
    ));

    let status_server = StatusServer::new(
        config.status_port,
        Arc::new(StatusServerState::new(env!("CARGO_PKG_VERSION"), board)),
        shutdown_token.clone(),
    );
    let server_task = tokio::spawn(async move {
        if let Err(e) = status_server.run().await {
            tracing::error!(error = %e, "Status server error");
        }
    });

    let sync_token = shutdown_token.clone();
    let sync_task = tokio::spawn(async move {
        orchestrator.run_auto_sync(sync_token).await;
    });

    tracing::info!("Broker sync ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = sync_task.await;
        let _ = server_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Shutdown timed out with tasks still running");
    }

    tracing::info!("Broker sync stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &SyncConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        storage_dir = %config.storage_dir.display(),
        status_port = config.status_port,
        scan_interval_secs = config.sync.scan_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        general_url = %config.endpoints.general_url,
        market_data_url = %config.endpoints.market_data_url,
        auth_url = %config.endpoints.auth_url,
        "Provider endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
