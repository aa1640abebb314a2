//! Shared fixtures for integration tests.
//!
//! A scripted provider endpoint speaking the duplex text protocol over a
//! local WebSocket listener.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

/// Server side of one client connection.
pub type ServerSocket = WebSocketStream<TcpStream>;

/// A request frame as the server sees it.
#[derive(Debug, Clone)]
pub struct RequestFrame {
    pub method: String,
    pub id: u64,
    pub query: String,
    pub body: String,
}

impl RequestFrame {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// Accept one connection on a fresh port and run `script` against it.
///
/// Returns the `ws://` address to connect to.
pub async fn serve<F, Fut>(script: F) -> String
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(ws).await;
    });
    format!("ws://{addr}")
}

pub async fn send(ws: &mut ServerSocket, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

/// Next text frame, heartbeats included. `None` once the client is gone.
pub async fn next_text(ws: &mut ServerSocket) -> Option<String> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Some(text.as_str().to_string()),
            Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
            Some(Ok(_)) => {}
        }
    }
}

/// Next request frame, skipping client heartbeats.
pub async fn next_request(ws: &mut ServerSocket) -> Option<RequestFrame> {
    loop {
        let text = next_text(ws).await?;
        if text == "[]" {
            continue;
        }
        let mut parts = text.splitn(4, '\n');
        return Some(RequestFrame {
            method: parts.next().unwrap_or_default().to_string(),
            id: parts.next().and_then(|id| id.parse().ok()).unwrap(),
            query: parts.next().unwrap_or_default().to_string(),
            body: parts.next().unwrap_or_default().to_string(),
        });
    }
}

pub async fn respond(ws: &mut ServerSocket, id: u64, status: u16, data: Value) {
    send(ws, &format!("a{}", json!([{"i": id, "s": status, "d": data}]))).await;
}

pub async fn emit(ws: &mut ServerSocket, events: &[(&str, Value)]) {
    let items: Vec<Value> = events
        .iter()
        .map(|(name, data)| json!({"e": name, "d": data}))
        .collect();
    send(ws, &format!("a{}", Value::Array(items))).await;
}

/// Send `o`, expect `authorize` and accept it.
pub async fn accept_session(ws: &mut ServerSocket) -> RequestFrame {
    send(ws, "o").await;
    let auth = next_request(ws).await.unwrap();
    assert_eq!(auth.method, "authorize");
    respond(ws, auth.id, 200, Value::Null).await;
    auth
}

/// Hold the connection until the client leaves.
pub async fn drain(ws: &mut ServerSocket) {
    while next_text(ws).await.is_some() {}
}
