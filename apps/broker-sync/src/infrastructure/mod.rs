//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loading.
pub mod config;

/// HTTP token endpoint adapter.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Status, liveness and metrics HTTP endpoint.
pub mod status_server;

/// Shared key-value store adapters.
pub mod storage;

/// Real-time channel subscriptions over the duplex transport.
pub mod subscription;

/// Account-sync stream adapter.
pub mod sync_stream;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Duplex WebSocket transport.
pub mod transport;
