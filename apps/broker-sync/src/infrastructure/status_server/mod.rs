//! Status and Metrics Endpoint
//!
//! HTTP endpoint exposing the sync engine's lifecycle signals, liveness and
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /status` - JSON snapshot of connection status, per-credential
//!   phase, per-account progress, aggregate stats and the message log
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{StatusBoard, StatusSnapshot};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// `/status` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Engine version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Lifecycle signals.
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the status server.
pub struct StatusServerState {
    version: String,
    started_at: Instant,
    board: Arc<StatusBoard>,
}

impl StatusServerState {
    /// Create new status server state.
    #[must_use]
    pub fn new(version: impl Into<String>, board: Arc<StatusBoard>) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            board,
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Status HTTP server.
pub struct StatusServer {
    port: u16,
    state: Arc<StatusServerState>,
    cancel: CancellationToken,
}

impl StatusServer {
    /// Create a new status server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<StatusServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the status server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StatusServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), StatusServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StatusServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Status server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| StatusServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Status server stopped");
        Ok(())
    }
}

/// Routes served by [`StatusServer`].
pub fn router(state: Arc<StatusServerState>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn status_handler(State(state): State<Arc<StatusServerState>>) -> impl IntoResponse {
    Json(StatusResponse {
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        snapshot: state.board.snapshot(),
    })
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

// =============================================================================
// Errors
// =============================================================================

/// Status server errors.
#[derive(Debug, thiserror::Error)]
pub enum StatusServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
