//! Duplex Transport Client
//!
//! One WebSocket connection to a provider endpoint.
//!
//! # Lifecycle
//!
//! 1. Connect and wait for the `o` frame
//! 2. Send `authorize` with the bearer token; resolve only on status 200
//! 3. Correlate responses to requests by id; fan events out to listeners
//!
//! When the connection closes, pending requests stay unresolved and
//! listeners are dropped. Callers watch [`TransportClient::closed`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{
    CodecError, EventItem, HEARTBEAT_FRAME, InboundFrame, Item, Request, ResponseItem, STATUS_OK,
    decode_frame, encode_request,
};
use super::heartbeat::{DEFAULT_QUIET_INTERVAL, HeartbeatState};
use super::{ListenerFn, ListenerId, Transport};
use crate::domain::channel::EndpointScope;

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the transport client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be reached or the handshake failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The `authorize` request returned a non-success status.
    #[error("authorization rejected: {0}")]
    AuthRejected(String),

    /// A request returned a non-success status.
    #[error("request failed with status {status}: {detail}")]
    Request {
        /// Response status.
        status: u16,
        /// Response payload.
        detail: String,
    },

    /// A request could not be encoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

impl From<CodecError> for TransportError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e.to_string())
    }
}

// =============================================================================
// Configuration and State
// =============================================================================

/// Transport client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Inbound silence after which a heartbeat precedes the next frame.
    pub heartbeat_quiet: Duration,
    /// Bound on connect, open and authorization together.
    pub open_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_quiet: DEFAULT_QUIET_INTERVAL,
            open_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for open and authorization.
    Connecting,
    /// Authorized.
    Open,
    /// Closed; terminal.
    Closed,
}

type PendingSender = oneshot::Sender<Result<Value, TransportError>>;

struct Shared {
    next_id: AtomicU64,
    next_listener: AtomicU64,
    pending: Mutex<HashMap<u64, PendingSender>>,
    listeners: RwLock<Vec<(ListenerId, ListenerFn)>>,
    heartbeat: HeartbeatState,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn resolve(&self, response: ResponseItem) {
        let Some(sender) = self.pending.lock().remove(&response.id) else {
            tracing::warn!(id = response.id, status = response.status, "Dropping unmatched response");
            return;
        };

        let result = if response.status == STATUS_OK {
            Ok(response.data)
        } else {
            Err(TransportError::Request {
                status: response.status,
                detail: response.data.to_string(),
            })
        };
        // The requester may have given up.
        let _ = sender.send(result);
    }

    fn dispatch(&self, event: &EventItem) {
        let listeners: Vec<ListenerFn> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// A connected, authorized duplex client.
pub struct TransportClient {
    scope: EndpointScope,
    outbound: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl TransportClient {
    /// Connect to `address`, authorize with `token` and start the I/O tasks.
    ///
    /// # Errors
    ///
    /// - `TransportError::Connection` if the address is unreachable, the
    ///   handshake fails, or open plus authorization exceed the timeout
    /// - `TransportError::AuthRejected` if `authorize` returns non-200
    pub async fn connect(
        address: &str,
        token: &str,
        scope: EndpointScope,
        config: &TransportConfig,
    ) -> Result<Arc<Self>, TransportError> {
        let establish = async {
            tracing::info!(address = %address, scope = %scope, "Connecting");
            let (ws_stream, _response) = tokio_tungstenite::connect_async(address)
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;

            let (client, opened) = Self::start(ws_stream, scope, config);
            opened
                .await
                .map_err(|_| TransportError::Connection("closed before open".into()))?;

            client.authorize(token).await?;
            Ok::<_, TransportError>(client)
        };

        tokio::time::timeout(config.open_timeout, establish)
            .await
            .map_err(|_| TransportError::Connection("timed out opening connection".into()))?
    }

    fn start<S>(
        ws_stream: tokio_tungstenite::WebSocketStream<S>,
        scope: EndpointScope,
        config: &TransportConfig,
    ) -> (Arc<Self>, oneshot::Receiver<()>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (state, state_rx) = watch::channel(ConnectionState::Connecting);
        let (opened_tx, opened_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(1),
            next_listener: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            heartbeat: HeartbeatState::new(config.heartbeat_quiet),
            state,
        });

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_cancel.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    frame = outbound_rx.recv() => {
                        let Some(frame) = frame else { break };
                        if let Err(e) = write.send(Message::Text(frame.into())).await {
                            tracing::debug!(error = %e, "Write failed");
                            writer_cancel.cancel();
                            break;
                        }
                    }
                }
            }
        });

        let reader_shared = shared.clone();
        let reader_cancel = cancel.clone();
        let heartbeat_tx = outbound.clone();
        tokio::spawn(async move {
            let mut opened = Some(opened_tx);
            loop {
                tokio::select! {
                    () = reader_cancel.cancelled() => break,
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if reader_shared.heartbeat.on_inbound(Instant::now()) {
                                let _ = heartbeat_tx.send(HEARTBEAT_FRAME.to_string());
                            }

                            match decode_frame(&text) {
                                Ok(InboundFrame::Open) => {
                                    if let Some(opened) = opened.take() {
                                        let _ = opened.send(());
                                    }
                                }
                                Ok(InboundFrame::Heartbeat) => {
                                    tracing::trace!("Server heartbeat");
                                }
                                Ok(InboundFrame::Items(items)) => {
                                    for item in items {
                                        match item {
                                            Item::Response(response) => reader_shared.resolve(response),
                                            Item::Event(event) => reader_shared.dispatch(&event),
                                        }
                                    }
                                }
                                Ok(InboundFrame::Close { code, reason }) => {
                                    tracing::info!(?code, ?reason, "Server closed connection");
                                    break;
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "Dropping undecodable frame");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("WebSocket stream ended");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WebSocket error");
                            break;
                        }
                    }
                }
            }

            reader_shared.listeners.write().clear();
            reader_shared.state.send_replace(ConnectionState::Closed);
            reader_cancel.cancel();
        });

        let client = Arc::new(Self {
            scope,
            outbound,
            shared,
            state_rx,
            cancel,
        });
        (client, opened_rx)
    }

    async fn authorize(&self, token: &str) -> Result<(), TransportError> {
        match self.send(Request::authorize(token)).await {
            Ok(_) => {
                self.shared.state.send_replace(ConnectionState::Open);
                tracing::info!(scope = %self.scope, "Connection authorized");
                Ok(())
            }
            Err(TransportError::Request { status, detail }) => {
                self.close();
                Err(TransportError::AuthRejected(format!("status {status}: {detail}")))
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut state = self.state_rx.clone();
        // Sender lives in `shared`, which outlives this borrow.
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Close the connection. Pending requests stay unresolved.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }
}

#[async_trait]
impl Transport for TransportClient {
    fn scope(&self) -> EndpointScope {
        self.scope
    }

    async fn send(&self, request: Request) -> Result<Value, TransportError> {
        if self.state() == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_request(id, &request)?;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        tracing::trace!(id, method = %request.method, "Sending request");
        if self.outbound.send(frame).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(TransportError::Closed);
        }

        rx.await.map_err(|_| TransportError::Closed)?
    }

    fn add_listener(&self, listener: ListenerFn) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners.write().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("scope", &self.scope)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_carry_detail() {
        let shared = Shared {
            next_id: AtomicU64::new(1),
            next_listener: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            heartbeat: HeartbeatState::default(),
            state: watch::channel(ConnectionState::Open).0,
        };
        let (tx, mut rx) = oneshot::channel();
        shared.pending.lock().insert(4, tx);

        shared.resolve(ResponseItem {
            id: 4,
            status: 404,
            data: Value::String("not found".into()),
        });

        let result = rx.try_recv().unwrap();
        assert!(matches!(
            result,
            Err(TransportError::Request { status: 404, detail }) if detail.contains("not found")
        ));
    }

    #[test]
    fn unmatched_response_is_dropped() {
        let shared = Shared {
            next_id: AtomicU64::new(1),
            next_listener: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            heartbeat: HeartbeatState::default(),
            state: watch::channel(ConnectionState::Open).0,
        };

        shared.resolve(ResponseItem {
            id: 99,
            status: 200,
            data: Value::Null,
        });

        assert!(shared.pending.lock().is_empty());
    }
}
