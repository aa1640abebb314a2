//! Transport client against a scripted provider endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use broker_sync::infrastructure::transport::{EventItem, Request};
use broker_sync::{ConnectionState, EndpointScope, Transport, TransportClient, TransportConfig, TransportError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use common::{accept_session, drain, emit, next_request, next_text, respond, send, serve};

fn config() -> TransportConfig {
    TransportConfig {
        heartbeat_quiet: Duration::from_millis(50),
        open_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn connect_authorizes_with_raw_token() {
    let (auth_tx, auth_rx) = oneshot::channel();
    let address = serve(|mut ws| async move {
        let auth = accept_session(&mut ws).await;
        let _ = auth_tx.send(auth);
        drain(&mut ws).await;
    })
    .await;

    let client = TransportClient::connect(&address, "tok-123", EndpointScope::General, &config())
        .await
        .unwrap();

    let auth = auth_rx.await.unwrap();
    assert_eq!(auth.body, "tok-123");
    assert_eq!(auth.query, "");
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(client.scope(), EndpointScope::General);
}

#[tokio::test]
async fn rejected_authorization_fails_connect() {
    let address = serve(|mut ws| async move {
        send(&mut ws, "o").await;
        let auth = next_request(&mut ws).await.unwrap();
        respond(&mut ws, auth.id, 401, json!("Access is denied")).await;
        drain(&mut ws).await;
    })
    .await;

    let result = TransportClient::connect(&address, "bad", EndpointScope::General, &config()).await;

    match result {
        Err(TransportError::AuthRejected(detail)) => assert!(detail.contains("401")),
        other => panic!("expected AuthRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_a_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let result = TransportClient::connect(&address, "tok", EndpointScope::General, &config()).await;

    assert!(matches!(result, Err(TransportError::Connection(_))));
}

#[tokio::test]
async fn silent_endpoint_times_out_opening() {
    let address = serve(|mut ws| async move {
        drain(&mut ws).await;
    })
    .await;
    let config = TransportConfig {
        open_timeout: Duration::from_millis(200),
        ..config()
    };

    let result = TransportClient::connect(&address, "tok", EndpointScope::General, &config).await;

    assert!(matches!(result, Err(TransportError::Connection(_))));
}

#[tokio::test]
async fn responses_resolve_by_correlation_id() {
    let address = serve(|mut ws| async move {
        accept_session(&mut ws).await;
        let first = next_request(&mut ws).await.unwrap();
        let second = next_request(&mut ws).await.unwrap();
        // Answer in reverse order, both in one frame.
        send(
            &mut ws,
            &format!(
                "a{}",
                json!([
                    {"i": second.id, "s": 200, "d": {"method": second.method}},
                    {"i": first.id, "s": 200, "d": {"method": first.method}},
                ])
            ),
        )
        .await;
        drain(&mut ws).await;
    })
    .await;

    let client = TransportClient::connect(&address, "tok", EndpointScope::General, &config())
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        client.send(Request::new("account/list")),
        client.send(Request::new("user/syncrequest").with_json(json!({"accounts": [1]}))),
    );

    // Whichever was written first, each gets its own response.
    assert_eq!(a.unwrap()["method"], "account/list");
    assert_eq!(b.unwrap()["method"], "user/syncrequest");
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn non_success_status_is_a_request_error() {
    let address = serve(|mut ws| async move {
        accept_session(&mut ws).await;
        let request = next_request(&mut ws).await.unwrap();
        respond(&mut ws, request.id, 404, json!({"errorText": "not found"})).await;
        drain(&mut ws).await;
    })
    .await;

    let client = TransportClient::connect(&address, "tok", EndpointScope::MarketData, &config())
        .await
        .unwrap();
    let result = client
        .send(Request::new("contract/find").with_query("name=ZZZ"))
        .await;

    match result {
        Err(TransportError::Request { status, detail }) => {
            assert_eq!(status, 404);
            assert!(detail.contains("not found"));
        }
        other => panic!("expected Request error, got {other:?}"),
    }
}

#[tokio::test]
async fn events_reach_listeners_in_frame_order() {
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let address = serve(|mut ws| async move {
        accept_session(&mut ws).await;
        go_rx.await.unwrap();
        emit(
            &mut ws,
            &[
                ("md", json!({"n": 1})),
                ("props", json!({"n": 2})),
                ("md", json!({"n": 3})),
            ],
        )
        .await;
        drain(&mut ws).await;
    })
    .await;

    let client = TransportClient::connect(&address, "tok", EndpointScope::MarketData, &config())
        .await
        .unwrap();

    let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = seen.clone();
    client.add_listener(Arc::new(move |event: &EventItem| {
        sink.lock().push((event.name.clone(), event.data["n"].clone()));
        let _ = done_tx.send(());
    }));
    go_tx.send(()).unwrap();

    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .unwrap();
    }

    let seen = seen.lock().clone();
    assert_eq!(
        seen,
        vec![
            ("md".to_string(), json!(1)),
            ("props".to_string(), json!(2)),
            ("md".to_string(), json!(3)),
        ]
    );
}

#[tokio::test]
async fn removed_listener_stops_receiving() {
    let address = serve(|mut ws| async move {
        accept_session(&mut ws).await;
        drain(&mut ws).await;
    })
    .await;

    let client = TransportClient::connect(&address, "tok", EndpointScope::General, &config())
        .await
        .unwrap();
    let id = client.add_listener(Arc::new(|_: &EventItem| {}));

    assert_eq!(client.listener_count(), 1);
    assert!(client.remove_listener(id));
    assert!(!client.remove_listener(id));
    assert_eq!(client.listener_count(), 0);
}

#[tokio::test]
async fn heartbeat_follows_quiet_interval() {
    let (beat_tx, beat_rx) = oneshot::channel();
    let address = serve(|mut ws| async move {
        accept_session(&mut ws).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        emit(&mut ws, &[("props", Value::Null)]).await;
        let text = next_text(&mut ws).await.unwrap();
        let _ = beat_tx.send(text);
        drain(&mut ws).await;
    })
    .await;

    let _client = TransportClient::connect(&address, "tok", EndpointScope::General, &config())
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), beat_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, "[]");
}

#[tokio::test]
async fn server_close_frame_closes_client() {
    let address = serve(|mut ws| async move {
        accept_session(&mut ws).await;
        send(&mut ws, r#"c[1000,"bye"]"#).await;
        drain(&mut ws).await;
    })
    .await;

    let client = TransportClient::connect(&address, "tok", EndpointScope::General, &config())
        .await
        .unwrap();
    client.add_listener(Arc::new(|_: &EventItem| {}));

    tokio::time::timeout(Duration::from_secs(5), client.closed())
        .await
        .unwrap();

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.listener_count(), 0);
    assert!(matches!(
        client.send(Request::new("account/list")).await,
        Err(TransportError::Closed)
    ));
}

#[tokio::test]
async fn local_close_ends_connection() {
    let address = serve(|mut ws| async move {
        accept_session(&mut ws).await;
        drain(&mut ws).await;
    })
    .await;

    let client = TransportClient::connect(&address, "tok", EndpointScope::General, &config())
        .await
        .unwrap();
    client.close();

    tokio::time::timeout(Duration::from_secs(5), client.closed())
        .await
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}
