//! Frame Codec
//!
//! Encoding and decoding for the provider's duplex text protocol.
//!
//! # Outbound
//!
//! One request per frame, four newline-separated parts:
//!
//! ```text
//! <method>\n<correlationId>\n<queryString>\n<body>
//! ```
//!
//! # Inbound
//!
//! A one-character type prefix:
//!
//! - `o`: connection opened
//! - `h`: server heartbeat
//! - `a[...]`: JSON array of items
//! - `c[code,"reason"]`: connection closed
//!
//! An item with `i` and `s` is a response to a request; an item with `e` is
//! an unsolicited event:
//!
//! ```json
//! [{"i":2,"s":200,"d":{"realtimeId":17}},{"e":"md","d":{"quotes":[]}}]
//! ```

use serde::Deserialize;
use serde_json::Value;

/// Client heartbeat frame.
pub const HEARTBEAT_FRAME: &str = "[]";

/// Status of a successful response.
pub const STATUS_OK: u16 = 200;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding or decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Empty frame.
    #[error("empty frame")]
    Empty,

    /// Unknown frame type prefix.
    #[error("unknown frame type: {0:?}")]
    UnknownFrameType(char),

    /// Method names cannot contain line breaks.
    #[error("invalid method name: {0:?}")]
    InvalidMethod(String),
}

// =============================================================================
// Outbound
// =============================================================================

/// Body of an outbound request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// JSON body.
    Json(Value),
    /// Raw text body, sent as-is.
    Raw(String),
}

/// An outbound request without its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Endpoint method, e.g. `md/subscribeQuote`.
    pub method: String,
    /// Optional query string, without the leading `?`.
    pub query: Option<String>,
    /// Optional body.
    pub body: RequestBody,
}

impl Request {
    /// Request with no query and no body.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            query: None,
            body: RequestBody::Empty,
        }
    }

    /// Attach a query string.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Attach a raw text body.
    #[must_use]
    pub fn with_raw(mut self, body: impl Into<String>) -> Self {
        self.body = RequestBody::Raw(body.into());
        self
    }

    /// The authorization request sent right after the connection opens.
    #[must_use]
    pub fn authorize(token: &str) -> Self {
        Self::new("authorize").with_raw(token)
    }
}

/// Encode a request with correlation id `id`.
///
/// # Errors
///
/// Returns `CodecError::InvalidMethod` if the method contains a line break.
pub fn encode_request(id: u64, request: &Request) -> Result<String, CodecError> {
    if request.method.contains('\n') {
        return Err(CodecError::InvalidMethod(request.method.clone()));
    }

    let body = match &request.body {
        RequestBody::Empty => String::new(),
        RequestBody::Json(value) => serde_json::to_string(value)?,
        RequestBody::Raw(text) => text.clone(),
    };

    Ok(format!(
        "{}\n{id}\n{}\n{body}",
        request.method,
        request.query.as_deref().unwrap_or_default()
    ))
}

// =============================================================================
// Inbound
// =============================================================================

/// Response to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseItem {
    /// Correlation id of the request.
    pub id: u64,
    /// Status code; 200 is success.
    pub status: u16,
    /// Payload, `Null` when absent.
    pub data: Value,
}

/// Unsolicited event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventItem {
    /// Event name, e.g. `md` or `props`.
    pub name: String,
    /// Payload, `Null` when absent.
    pub data: Value,
}

/// One element of an item array.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// A response.
    Response(ResponseItem),
    /// An event.
    Event(EventItem),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Connection opened; authorization may be sent.
    Open,
    /// Server heartbeat.
    Heartbeat,
    /// Items in array order. Unrecognized items are left out.
    Items(Vec<Item>),
    /// Server closed the connection.
    Close {
        /// Close code, if sent.
        code: Option<i64>,
        /// Close reason, if sent.
        reason: Option<String>,
    },
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(rename = "i")]
    id: Option<u64>,
    #[serde(rename = "s")]
    status: Option<u16>,
    #[serde(rename = "e")]
    event: Option<String>,
    #[serde(rename = "d", default)]
    data: Value,
}

impl RawItem {
    fn into_item(self) -> Option<Item> {
        match (self.id, self.status, self.event) {
            (Some(id), Some(status), _) => Some(Item::Response(ResponseItem {
                id,
                status,
                data: self.data,
            })),
            (_, _, Some(name)) => Some(Item::Event(EventItem {
                name,
                data: self.data,
            })),
            _ => None,
        }
    }
}

/// Decode one inbound text frame.
///
/// # Errors
///
/// Returns `CodecError` for an empty frame, an unknown prefix or a
/// malformed JSON payload.
pub fn decode_frame(text: &str) -> Result<InboundFrame, CodecError> {
    let mut chars = text.chars();
    let prefix = chars.next().ok_or(CodecError::Empty)?;
    let payload = chars.as_str();

    match prefix {
        'o' => Ok(InboundFrame::Open),
        'h' => Ok(InboundFrame::Heartbeat),
        'a' => {
            let raw: Vec<Value> = serde_json::from_str(payload)?;
            let mut items = Vec::with_capacity(raw.len());
            for value in raw {
                match serde_json::from_value::<RawItem>(value).map(RawItem::into_item) {
                    Ok(Some(item)) => items.push(item),
                    Ok(None) => tracing::debug!("Skipping item with neither response nor event keys"),
                    Err(e) => tracing::debug!(error = %e, "Skipping malformed item"),
                }
            }
            Ok(InboundFrame::Items(items))
        }
        'c' => {
            let detail: Vec<Value> = if payload.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(payload)?
            };
            Ok(InboundFrame::Close {
                code: detail.first().and_then(Value::as_i64),
                reason: detail.get(1).and_then(Value::as_str).map(str::to_string),
            })
        }
        other => Err(CodecError::UnknownFrameType(other)),
    }
}
