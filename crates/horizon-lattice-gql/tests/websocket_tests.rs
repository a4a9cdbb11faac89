//! WebSocket transport tests against a loopback server.

use futures_util::{SinkExt, StreamExt};
use horizon_lattice_gql::{
    CloseCode, CloseReason, Error, GraphQLRequest, GraphQLSocketClient, NoopLog, Transport,
    TransportEvent, WebSocketConfig, WebSocketTransport,
};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WireCloseCode;

/// Handshake headers the server saw.
#[derive(Debug, Default)]
struct Handshake {
    protocol: Option<String>,
    request_id: Option<String>,
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/v1/graphql", listener.local_addr().unwrap());
    (listener, url)
}

/// Accept one connection, agreeing to `graphql-ws`.
async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, Handshake) {
    let (stream, _) = listener.accept().await.unwrap();
    let (tx, rx) = oneshot::channel();
    let callback = move |request: &Request, mut response: Response| {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };
        let _ = tx.send(Handshake {
            protocol: header("sec-websocket-protocol"),
            request_id: header("x-request-id"),
        });
        response
            .headers_mut()
            .insert("sec-websocket-protocol", HeaderValue::from_static("graphql-ws"));
        Ok::<_, ErrorResponse>(response)
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .unwrap();
    (ws, rx.await.unwrap())
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_query_over_websocket() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, handshake) = accept(&listener).await;
        let init = next_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "connection_ack"})).await;

        let start = next_json(&mut ws).await;
        let id = start["id"].clone();
        send_json(&mut ws, json!({"type": "ka"})).await;
        send_json(
            &mut ws,
            json!({"type": "data", "id": id, "payload": {"data": {"n": 1}}}),
        )
        .await;
        send_json(&mut ws, json!({"type": "complete", "id": id})).await;
        (handshake, init, start)
    });

    let client = GraphQLSocketClient::builder(url)
        .admin_secret("s3cret")
        .handshake_header("x-request-id", "42")
        .log(NoopLog)
        .build()
        .unwrap();

    let data = client.execute(GraphQLRequest::query("{ n }")).await.unwrap();
    assert_eq!(data, Some(json!({"n": 1})));

    let (handshake, init, start) = server.await.unwrap();
    assert_eq!(handshake.protocol.as_deref(), Some("graphql-ws"));
    assert_eq!(handshake.request_id.as_deref(), Some("42"));
    assert_eq!(
        init,
        json!({
            "type": "connection_init",
            "payload": {"headers": {"x-hasura-admin-secret": "s3cret"}}
        })
    );
    assert_eq!(start["type"], "start");
    assert_eq!(start["payload"], json!({"query": "{ n }"}));
}

#[tokio::test]
async fn test_server_close_fails_operations() {
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        next_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "connection_ack"})).await;
        next_json(&mut ws).await;
        let _ = ws
            .close(Some(CloseFrame {
                code: WireCloseCode::from(4403),
                reason: "forbidden".into(),
            }))
            .await;
        // Drain until the client acknowledges the close.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = GraphQLSocketClient::builder(url)
        .token("token")
        .log(NoopLog)
        .build()
        .unwrap();

    let err = client
        .execute(GraphQLRequest::query("{ n }"))
        .await
        .unwrap_err();
    let err = err.normalized().unwrap();
    assert_eq!(err.message, "WebSocket connection closed");
    assert_eq!(err.extension("code"), Some(&json!(4403)));
    assert_eq!(err.extension("reason"), Some(&json!("forbidden")));
}

#[tokio::test]
async fn test_refused_connection_fails_readiness() {
    let (listener, url) = bind().await;
    drop(listener);

    let client = GraphQLSocketClient::builder(url)
        .log(NoopLog)
        .build()
        .unwrap();

    let err = client.ready().await.unwrap_err();
    let err = err.normalized().unwrap();
    assert_eq!(err.message, "WebSocket connection failed");
    assert!(err.extension("error").is_some());

    let err = client
        .execute(GraphQLRequest::query("{ n }"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Operation(_)));
}

#[tokio::test]
async fn test_transport_close_sends_close_frame() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => {
                    return frame.map(|f| (u16::from(f.code), f.reason.as_str().to_string()));
                }
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    });

    let (transport, mut events) = WebSocketTransport::connect(WebSocketConfig::new(url)).unwrap();
    assert_eq!(events.recv().await, Some(TransportEvent::Open));
    assert!(transport.is_open());

    transport.close(Some(CloseReason::with_reason(CloseCode::Normal, "done")));
    assert_eq!(
        events.recv().await,
        Some(TransportEvent::Close(Some(CloseReason::with_reason(
            CloseCode::Normal,
            "done"
        ))))
    );
    assert!(!transport.is_open());
    assert!(matches!(transport.send("late".into()), Err(Error::NotConnected)));

    assert_eq!(server.await.unwrap(), Some((1000, "done".to_string())));
}
