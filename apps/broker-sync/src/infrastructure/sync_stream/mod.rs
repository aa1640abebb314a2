//! Sync Stream Adapter
//!
//! [`SyncConnector`] on top of the duplex transport. Opens a general-scope
//! connection, sends the account-sync `init` request and turns the event
//! items that follow into [`SyncFrame`]s.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::application::ports::{ConnectorError, SyncConnection, SyncConnector, SyncFrame, SyncInit};
use crate::domain::channel::{ChannelKind, EndpointScope};
use crate::domain::progress::ProgressEvent;
use crate::domain::schedule::format_wire_date;
use crate::infrastructure::metrics;
use crate::infrastructure::subscription::{
    ChannelItem, ItemCallback, SubscriptionError, SubscriptionHandle, SubscriptionManager,
};
use crate::infrastructure::transport::{TransportClient, TransportConfig, TransportError};

mod log_line;

pub use log_line::translate_log_line;

// =============================================================================
// Connector
// =============================================================================

/// Opens account-sync streams on the general endpoint.
#[derive(Debug, Clone)]
pub struct TransportSyncConnector {
    general_url: String,
    config: TransportConfig,
}

impl TransportSyncConnector {
    /// Create a connector for `general_url`.
    #[must_use]
    pub fn new(general_url: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            general_url: general_url.into(),
            config,
        }
    }
}

#[async_trait]
impl SyncConnector for TransportSyncConnector {
    async fn open(&self, init: &SyncInit) -> Result<Box<dyn SyncConnection>, ConnectorError> {
        let client = TransportClient::connect(
            &self.general_url,
            &init.token,
            EndpointScope::General,
            &self.config,
        )
        .await
        .map_err(|e| match e {
            TransportError::AuthRejected(detail) => ConnectorError::AuthRejected(detail),
            other => ConnectorError::Connection(other.to_string()),
        })?;

        let (tx, frames) = mpsc::unbounded_channel();
        let on_item: ItemCallback = Arc::new(move |item: &ChannelItem| {
            metrics::record_frame_received();
            // Receiver gone means the connection is being torn down.
            let _ = tx.send(translate_item(item));
        });

        let handle = SubscriptionManager::new(client.clone())
            .subscribe(ChannelKind::AccountSync, init_body(init), on_item)
            .await
            .map_err(|e| {
                client.close();
                match e {
                    SubscriptionError::InvalidSubscription { .. } => {
                        ConnectorError::InvalidSubscription(e.to_string())
                    }
                    other => ConnectorError::InitRejected(other.to_string()),
                }
            })?;

        tracing::info!(
            accounts = init.accounts.len(),
            start_date = %init.start_date,
            "Sync stream opened"
        );

        Ok(Box::new(TransportSyncConnection {
            client,
            handle,
            frames,
            closed: false,
        }))
    }
}

fn init_body(init: &SyncInit) -> Value {
    json!({
        "token": init.token,
        "accounts": init.accounts,
        "startDate": format_wire_date(init.start_date),
    })
}

// =============================================================================
// Connection
// =============================================================================

struct TransportSyncConnection {
    client: Arc<TransportClient>,
    handle: SubscriptionHandle,
    frames: mpsc::UnboundedReceiver<SyncFrame>,
    closed: bool,
}

#[async_trait]
impl SyncConnection for TransportSyncConnection {
    async fn next_frame(&mut self) -> Option<SyncFrame> {
        if self.closed {
            return None;
        }
        tokio::select! {
            biased;
            frame = self.frames.recv() => frame,
            () = self.client.closed() => self.frames.try_recv().ok(),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.handle.cancel().await {
            tracing::debug!(error = %e, "Sync subscription cancel failed");
        }
        self.client.close();
    }
}

// =============================================================================
// Item Translation
// =============================================================================

/// Translate one account-sync event item.
///
/// - `sync`: a typed progress payload, or log text
/// - `log`: log text, translated when it describes progress
/// - `error`: server-side failure of the run
/// - anything else: activity only
#[must_use]
pub fn translate_item(item: &ChannelItem) -> SyncFrame {
    match item.event.as_str() {
        "sync" => {
            if let Some(text) = item.data.as_str() {
                return from_log_text(text);
            }
            match serde_json::from_value::<ProgressEvent>(item.data.clone()) {
                Ok(event) => SyncFrame::Progress(event),
                Err(e) => {
                    tracing::debug!(error = %e, "Undecodable sync payload");
                    metrics::record_frame_dropped("undecodable");
                    SyncFrame::Activity
                }
            }
        }
        "log" => from_log_text(&text_of(&item.data, "text")),
        "error" => SyncFrame::Error(text_of(&item.data, "errorText")),
        _ => SyncFrame::Activity,
    }
}

fn from_log_text(text: &str) -> SyncFrame {
    translate_log_line(text).map_or_else(|| SyncFrame::Message(text.to_string()), SyncFrame::Progress)
}

fn text_of(data: &Value, field: &str) -> String {
    data.as_str()
        .or_else(|| data.get(field).and_then(Value::as_str))
        .map_or_else(|| data.to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn item(event: &str, data: Value) -> ChannelItem {
        ChannelItem {
            event: event.into(),
            data,
        }
    }

    #[test]
    fn typed_sync_payload_becomes_progress() {
        let frame = translate_item(&item(
            "sync",
            json!({"type": "accountCompleted", "account": "ACC1", "orders": 12}),
        ));
        assert_eq!(
            frame,
            SyncFrame::Progress(ProgressEvent::AccountCompleted {
                account: "ACC1".into(),
                orders: 12
            })
        );
    }

    #[test]
    fn progress_log_text_is_translated() {
        let frame = translate_item(&item(
            "log",
            json!({"text": "Processing date 3 of 10 for ACC1 (2024-03-13)"}),
        ));
        assert_eq!(
            frame,
            SyncFrame::Progress(ProgressEvent::DayProgress {
                account: "ACC1".into(),
                day: 3,
                total_days: 10,
                date: NaiveDate::from_ymd_opt(2024, 3, 13).unwrap(),
            })
        );
    }

    #[test]
    fn other_log_text_is_a_message() {
        assert_eq!(
            translate_item(&item("log", json!("Fetching fills"))),
            SyncFrame::Message("Fetching fills".into())
        );
    }

    #[test]
    fn error_event_carries_text() {
        assert_eq!(
            translate_item(&item("error", json!({"errorText": "Access denied"}))),
            SyncFrame::Error("Access denied".into())
        );
    }

    #[test]
    fn other_events_are_activity() {
        assert_eq!(
            translate_item(&item("props", json!({"entityType": "order"}))),
            SyncFrame::Activity
        );
        assert_eq!(translate_item(&item("sync", json!({"type": "unknown"}))), SyncFrame::Activity);
    }

    #[test]
    fn init_body_uses_wire_date() {
        let init = SyncInit {
            token: "tok".into(),
            accounts: vec!["ACC1".into()],
            start_date: NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(),
        };
        let body = init_body(&init);
        assert_eq!(body["startDate"], "20240311");
        assert_eq!(body["accounts"], json!(["ACC1"]));
    }
}
