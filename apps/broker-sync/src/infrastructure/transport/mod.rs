//! Duplex Transport
//!
//! WebSocket client for the provider's text protocol, its frame codec,
//! the inbound-driven heartbeat and the reconnect backoff.
//!
//! # Components
//!
//! - [`TransportClient`]: connection, authorization, request correlation,
//!   event fan-out
//! - [`codec`]: frame encoding and decoding
//! - [`HeartbeatState`]: heartbeat decision on inbound frames
//! - [`ReconnectPolicy`]: bounded exponential backoff

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::channel::EndpointScope;

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod reconnect;

pub use client::{ConnectionState, TransportClient, TransportConfig, TransportError};
pub use codec::{EventItem, Request, RequestBody};
pub use heartbeat::HeartbeatState;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};

/// Callback invoked once per event item.
pub type ListenerFn = Arc<dyn Fn(&EventItem) + Send + Sync>;

/// Handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Request/response and event surface of a connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Endpoint the connection is attached to.
    fn scope(&self) -> EndpointScope;

    /// Send a request and wait for its response.
    ///
    /// No timeout is applied.
    async fn send(&self, request: Request) -> Result<Value, TransportError>;

    /// Register an event listener.
    fn add_listener(&self, listener: ListenerFn) -> ListenerId;

    /// Remove a listener. Returns whether it was registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}
