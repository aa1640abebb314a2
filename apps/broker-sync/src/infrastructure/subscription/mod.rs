//! Subscription Manager
//!
//! Opens real-time channels on a transport and routes matching event items
//! to a callback.
//!
//! # Subscribe Flow
//!
//! 1. Check the channel kind against the connection's endpoint scope
//! 2. Send the subscribe request, following deferred-retry tickets
//! 3. Read the realtime or subscription id from the response
//! 4. For symbol channels, resolve the instrument's numeric id
//! 5. Register a listener filtering on collection key and id
//!
//! Cancelling removes the listener and, for cancellable kinds, sends the
//! server-side cancel once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use crate::domain::channel::{ChannelKind, EndpointScope};
use crate::infrastructure::transport::{
    EventItem, ListenerFn, ListenerId, Request, Transport, TransportError,
};

/// Event names carrying market data.
const MARKET_DATA_EVENTS: [&str; 2] = ["md", "chart"];

// =============================================================================
// Types
// =============================================================================

/// One item delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelItem {
    /// Name of the event the item arrived in.
    pub event: String,
    /// The item.
    pub data: Value,
}

/// Subscriber callback.
pub type ItemCallback = Arc<dyn Fn(&ChannelItem) + Send + Sync>;

/// Errors from the subscription manager.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubscriptionError {
    /// The channel needs a different endpoint.
    #[error("{kind} requires a {required} connection, got {actual}")]
    InvalidSubscription {
        /// Requested channel.
        kind: ChannelKind,
        /// Scope the channel needs.
        required: EndpointScope,
        /// Scope of the connection.
        actual: EndpointScope,
    },

    /// The subscribe response carried no usable id.
    #[error("{0} subscription response carried no id")]
    MissingId(ChannelKind),

    /// The body did not name a symbol.
    #[error("{0} subscription needs a symbol")]
    MissingSymbol(ChannelKind),

    /// No instrument matched the symbol.
    #[error("instrument not found: {0}")]
    InstrumentNotFound(String),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Manager
// =============================================================================

/// Opens channels on one transport.
#[derive(Clone)]
pub struct SubscriptionManager {
    transport: Arc<dyn Transport>,
}

impl SubscriptionManager {
    /// Create a manager for `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Open a channel and route its items to `on_item`.
    ///
    /// # Errors
    ///
    /// - `SubscriptionError::InvalidSubscription` before any request when
    ///   the connection has the wrong scope
    /// - `SubscriptionError::Transport` when a request fails
    /// - `SubscriptionError::MissingId` / `MissingSymbol` /
    ///   `InstrumentNotFound` when the channel cannot be addressed
    pub async fn subscribe(
        &self,
        kind: ChannelKind,
        body: Value,
        on_item: ItemCallback,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        let actual = self.transport.scope();
        let required = kind.required_scope();
        if actual != required {
            return Err(SubscriptionError::InvalidSubscription {
                kind,
                required,
                actual,
            });
        }

        let response = self.send_following_tickets(kind, body.clone()).await?;
        let internal_id = response
            .get("realtimeId")
            .or_else(|| response.get("subscriptionId"))
            .and_then(Value::as_i64);

        let symbol = body.get("symbol").cloned();
        let match_id = if kind.addresses_symbol() {
            let symbol = symbol
                .clone()
                .ok_or(SubscriptionError::MissingSymbol(kind))?;
            Some(self.resolve_instrument(&symbol).await?)
        } else if kind == ChannelKind::Chart {
            Some(internal_id.ok_or(SubscriptionError::MissingId(kind))?)
        } else {
            None
        };

        let listener_id = self
            .transport
            .add_listener(item_filter(kind, match_id, on_item));

        let cancel_request = kind.cancel_method().map(|method| {
            let body = match kind {
                ChannelKind::Chart => json!({ "subscriptionId": internal_id }),
                _ => json!({ "symbol": symbol }),
            };
            Request::new(method).with_json(body)
        });

        tracing::debug!(
            kind = %kind,
            internal_id = ?internal_id,
            match_id = ?match_id,
            "Subscribed"
        );

        Ok(SubscriptionHandle {
            transport: self.transport.clone(),
            kind,
            listener_id,
            cancel_request,
            cancelled: AtomicBool::new(false),
        })
    }

    async fn send_following_tickets(
        &self,
        kind: ChannelKind,
        body: Value,
    ) -> Result<Value, SubscriptionError> {
        let mut request = Request::new(kind.subscribe_method()).with_json(body.clone());

        loop {
            let response = self.transport.send(request).await?;
            let Some(ticket) = response.get("p-ticket").and_then(Value::as_str) else {
                return Ok(response);
            };

            let wait = Duration::from_secs(response.get("p-time").and_then(Value::as_u64).unwrap_or(0));
            tracing::info!(kind = %kind, wait_secs = wait.as_secs(), "Subscription deferred");
            tokio::time::sleep(wait).await;

            let mut retry = body.clone();
            if let Value::Object(map) = &mut retry {
                map.insert("p-ticket".into(), Value::String(ticket.to_string()));
            }
            request = Request::new(kind.subscribe_method()).with_json(retry);
        }
    }

    async fn resolve_instrument(&self, symbol: &Value) -> Result<i64, SubscriptionError> {
        if let Some(id) = symbol.as_i64() {
            return Ok(id);
        }
        let name = symbol.as_str().unwrap_or_default();

        let exact = self
            .transport
            .send(Request::new("contract/find").with_query(format!("name={name}")))
            .await;
        match exact {
            Ok(found) => {
                if let Some(id) = found.get("id").and_then(Value::as_i64) {
                    return Ok(id);
                }
            }
            Err(TransportError::Request { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(symbol = %name, "No exact instrument match, trying suggest");
        let suggested = self
            .transport
            .send(Request::new("contract/suggest").with_query(format!("t={name}&l=1")))
            .await?;
        suggested
            .as_array()
            .and_then(|items| items.first())
            .and_then(|item| item.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| SubscriptionError::InstrumentNotFound(name.to_string()))
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("scope", &self.transport.scope())
            .finish()
    }
}

/// Build the listener that picks a channel's items out of events.
fn item_filter(kind: ChannelKind, match_id: Option<i64>, on_item: ItemCallback) -> ListenerFn {
    Arc::new(move |event: &EventItem| {
        let Some(key) = kind.collection_key() else {
            if !MARKET_DATA_EVENTS.contains(&event.name.as_str()) {
                on_item(&ChannelItem {
                    event: event.name.clone(),
                    data: event.data.clone(),
                });
            }
            return;
        };

        let Some(items) = event.data.get(key).and_then(Value::as_array) else {
            return;
        };
        for item in items {
            let id = item.get(kind.item_id_field()).and_then(Value::as_i64);
            if match_id.is_none() || id == match_id {
                on_item(&ChannelItem {
                    event: event.name.clone(),
                    data: item.clone(),
                });
            }
        }
    })
}

// =============================================================================
// Handle
// =============================================================================

/// An open channel.
pub struct SubscriptionHandle {
    transport: Arc<dyn Transport>,
    kind: ChannelKind,
    listener_id: ListenerId,
    cancel_request: Option<Request>,
    cancelled: AtomicBool,
}

impl SubscriptionHandle {
    /// Channel kind.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Whether `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stop delivering items and cancel on the server. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError::Transport` if the server cancel fails;
    /// the listener is removed regardless.
    pub async fn cancel(&self) -> Result<(), SubscriptionError> {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.transport.remove_listener(self.listener_id);
        if let Some(request) = &self.cancel_request {
            self.transport.send(request.clone()).await?;
        }
        tracing::debug!(kind = %self.kind, "Subscription cancelled");
        Ok(())
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("kind", &self.kind)
            .field("listener_id", &self.listener_id)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
