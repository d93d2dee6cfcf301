//! Integration tests for the SSE transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body, BodyDataStream};
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use mcp_context_server::mcp::transport::SseTransport;
use mcp_context_server::mcp::{
    HandlerResult, McpServer, RequestContext, ServerInfo, SessionSettings, SharedHandler,
};
use mcp_context_server::security::OriginAllowList;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Reads SSE blocks off a response body and returns their `data` payloads.
struct EventReader {
    body: BodyDataStream,
    buffer: String,
}

impl EventReader {
    fn new(body: Body) -> Self {
        Self {
            body: body.into_data_stream(),
            buffer: String::new(),
        }
    }

    async fn next_data(&mut self) -> Value {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let data: Vec<&str> = block
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim_start)
                    .collect();
                if data.is_empty() {
                    continue;
                }
                return serde_json::from_str(&data.join("\n")).unwrap();
            }

            let chunk = tokio::time::timeout(Duration::from_secs(5), self.body.next())
                .await
                .expect("timed out waiting for event")
                .expect("stream ended")
                .unwrap();
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
}

fn transport() -> SseTransport {
    SseTransport::new(
        "127.0.0.1:0",
        Arc::new(OriginAllowList::allow_all()),
        SessionSettings::default(),
    )
}

fn router(transport: &SseTransport) -> axum::Router {
    let info = ServerInfo::new("sse-test", "2.0.0", "");
    transport.router(
        CancellationToken::new(),
        info.clone(),
        Arc::new(McpServer::new(info)),
    )
}

#[tokio::test]
async fn stream_opens_with_session_then_server_info() {
    let transport = transport();
    let response = router(&transport)
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let mut events = EventReader::new(response.into_body());

    let first = events.next_data().await;
    assert_eq!(first["type"], "session");
    let session_id = first["sessionId"].as_str().unwrap();
    assert!(transport.sessions().get(session_id).is_some());

    let second = events.next_data().await;
    assert_eq!(second["type"], "server.info");
    assert_eq!(second["data"]["name"], "sse-test");
    assert_eq!(second["data"]["version"], "2.0.0");
}

#[tokio::test]
async fn reply_is_pushed_on_the_session_stream() {
    let transport = transport();
    let router = router(&transport);

    let response = router
        .clone()
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut events = EventReader::new(response.into_body());
    let session_id = events.next_data().await["sessionId"]
        .as_str()
        .unwrap()
        .to_string();
    events.next_data().await;

    let response = router
        .oneshot(
            Request::post(format!("/messages?sessionId={session_id}"))
                .body(Body::from(r#"{"jsonrpc":"2.0","id":42,"method":"ping"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let ack: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(ack["status"], "ok");

    let pushed = events.next_data().await;
    assert_eq!(pushed["type"], "response");
    assert_eq!(pushed["data"]["id"], 42);
    assert_eq!(pushed["data"]["result"], serde_json::json!({}));
}

#[tokio::test]
async fn errors_are_pushed_as_error_messages() {
    let transport = transport();
    let router = router(&transport);

    let response = router
        .clone()
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut events = EventReader::new(response.into_body());
    let session_id = events.next_data().await["sessionId"]
        .as_str()
        .unwrap()
        .to_string();
    events.next_data().await;

    router
        .oneshot(
            Request::post(format!("/messages?sessionId={session_id}"))
                .body(Body::from(r#"{"jsonrpc":"1.0","id":7,"method":"ping"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    let pushed = events.next_data().await;
    assert_eq!(pushed["type"], "error");
    assert_eq!(pushed["data"]["id"], 7);
    assert_eq!(pushed["data"]["error"]["code"], -32600);
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let transport = transport();
    let response = router(&transport)
        .oneshot(
            Request::post("/messages?sessionId=does-not-exist")
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(transport.sessions().is_empty());
}

#[tokio::test]
async fn malformed_body_on_live_session_is_rejected() {
    let transport = transport();
    let (session, mut rx) = transport.sessions().create();

    let response = router(&transport)
        .oneshot(
            Request::post(format!("/messages?sessionId={}", session.id()))
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"Invalid JSON");
    tokio::task::yield_now().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unknown_session_never_reaches_the_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let handler: SharedHandler = Arc::new(move |_ctx: RequestContext, request: Vec<u8>| {
        counted.fetch_add(1, Ordering::SeqCst);
        async move { HandlerResult::Ok(Some(request)) }
    });

    let transport = transport();
    let router = transport.router(CancellationToken::new(), ServerInfo::default(), handler);
    for uri in ["/messages", "/messages?sessionId=does-not-exist"] {
        let response = router
            .clone()
            .oneshot(
                Request::post(uri)
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn closing_the_stream_removes_the_session() {
    let transport = transport();
    let response = router(&transport)
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut events = EventReader::new(response.into_body());
    events.next_data().await;
    assert_eq!(transport.sessions().len(), 1);

    drop(events);
    assert!(transport.sessions().is_empty());
}

#[tokio::test]
async fn health_names_the_transport() {
    let transport = transport();
    let response = router(&transport)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["transport"], "sse");
    assert_eq!(body["server"], "sse-test");
}
