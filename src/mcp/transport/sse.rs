//! Server-sent events transport.
//!
//! Submission and delivery are split across two endpoints:
//!
//! - `GET /sse` opens a push stream. The first event carries the new session
//!   id, the second the server info; replies follow as they are produced.
//! - `POST /messages?sessionId=<id>` submits a request for that session. The
//!   call returns 200 immediately; the reply is pushed on the session's stream
//!   as `{"type": "response"|"error", "data": <envelope>}`.
//!
//! Replies are enqueued with backpressure: a full session queue delays the
//! reply rather than dropping it.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::Stream;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::framing::MAX_FRAME_SIZE;
use super::web::{self, Health, SharedCors};
use super::{Transport, TransportKind};
use crate::error::TransportError;
use crate::mcp::dispatch::dispatch;
use crate::mcp::handler::{ServerInfo, SharedHandler};
use crate::mcp::session::{SessionGuard, SessionRegistry, SessionSettings};

#[derive(Clone)]
struct SseState {
    info: Arc<ServerInfo>,
    handler: SharedHandler,
    sessions: Arc<SessionRegistry>,
    settings: SessionSettings,
    shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Push-stream transport with a companion submission endpoint.
#[derive(Debug)]
pub struct SseTransport {
    addr: String,
    cors: SharedCors,
    settings: SessionSettings,
    sessions: Arc<SessionRegistry>,
}

impl SseTransport {
    /// Creates a transport that will listen on `addr`.
    pub fn new(addr: impl Into<String>, cors: SharedCors, settings: SessionSettings) -> Self {
        Self {
            addr: addr.into(),
            cors,
            settings,
            sessions: Arc::new(SessionRegistry::new(settings.queue_capacity)),
        }
    }

    /// The live sessions of this transport.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Builds the routes without binding a socket.
    pub fn router(
        &self,
        shutdown: CancellationToken,
        info: ServerInfo,
        handler: SharedHandler,
    ) -> Router {
        let state = SseState {
            info: Arc::new(info),
            handler,
            sessions: Arc::clone(&self.sessions),
            settings: self.settings,
            shutdown,
        };

        let protocol = Router::new()
            .route("/sse", get(open_stream).options(web::preflight))
            .route("/messages", post(submit).options(web::preflight))
            .route_layer(from_fn_with_state(Arc::clone(&self.cors), web::cors_guard));

        Router::new()
            .merge(protocol)
            .route("/health", get(health))
            .with_state(state)
            .layer(DefaultBodyLimit::max(MAX_FRAME_SIZE))
            .layer(TraceLayer::new_for_http())
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn start(
        &self,
        shutdown: CancellationToken,
        info: ServerInfo,
        handler: SharedHandler,
    ) -> Result<(), TransportError> {
        let router = self.router(shutdown.clone(), info, handler);
        let sessions = Arc::clone(&self.sessions);
        web::serve(&self.addr, router, shutdown, move || {
            let closed = sessions.close_all();
            info!(closed, "SSE transport shutting down");
        })
        .await
    }
}

/// `GET /sse`
async fn open_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session, mut rx) = state.sessions.create();
    let guard = SessionGuard::new(Arc::clone(&state.sessions), session.id().to_string());
    info!(session_id = %session.id(), "SSE client connected");

    let hello = json!({ "type": "session", "sessionId": session.id() }).to_string();
    let server_info = json!({ "type": "server.info", "data": &*state.info }).to_string();
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        let _guard = guard;

        yield Ok::<_, Infallible>(Event::default().data(hello));
        yield Ok(Event::default().data(server_info));

        loop {
            let message = tokio::select! {
                () = shutdown.cancelled() => None,
                () = session.closed() => None,
                message = rx.recv() => message,
            };
            let Some(message) = message else { break };
            yield Ok(Event::default().data(String::from_utf8_lossy(&message)));
        }

        debug!(session_id = %session.id(), "SSE stream ended");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.settings.keepalive)
            .text("keepalive"),
    )
}

/// `POST /messages?sessionId=<id>`
async fn submit(
    State(state): State<SseState>,
    Query(query): Query<MessagesQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId").into_response();
    };
    let Some(session) = state.sessions.get(&session_id) else {
        warn!(session_id = %session_id, "Submission for unknown session");
        return (StatusCode::BAD_REQUEST, "Invalid session").into_response();
    };
    if serde_json::from_slice::<IgnoredAny>(&body).is_err() {
        return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response();
    }
    session.touch();

    let ctx = web::request_context(&state.shutdown, TransportKind::Sse, headers);
    let handler = Arc::clone(&state.handler);
    tokio::spawn(async move {
        let outcome = dispatch(handler.as_ref(), ctx, body.to_vec()).await;
        let Some(message) = web::push_message(outcome) else {
            return;
        };
        if let Err(e) = session.send(message).await {
            debug!(session_id = %session.id(), error = %e, "Reply dropped");
        }
    });

    Json(json!({ "status": "ok" })).into_response()
}

async fn health(State(state): State<SseState>) -> Response {
    Json(Health::new(&state.info).transport("sse")).into_response()
}
