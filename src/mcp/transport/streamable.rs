//! Streamable HTTP transport.
//!
//! Combines the HTTP and SSE transports behind content negotiation:
//!
//! | Endpoint         | Behaviour                                                    |
//! |------------------|--------------------------------------------------------------|
//! | `POST /mcp`      | JSON reply, or one `event: response`/`event: error` if the client asked for a stream |
//! | `GET /stream`    | persistent push stream: `event: init`, then `event: message` |
//! | `POST /messages` | submit for a session, reply pushed on its stream, 202        |
//! | `GET /health`    | name, version, protocol and capability flags                 |
//!
//! Sessions idle for longer than the configured timeout are reaped by a
//! background task, so clients that vanish without closing their stream do
//! not hold a session forever.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::header::{ACCEPT, CONNECTION};
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
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::framing::MAX_FRAME_SIZE;
use super::web::{self, Capabilities, Health, SharedCors};
use super::{Transport, TransportKind};
use crate::error::{EnqueueError, TransportError};
use crate::mcp::dispatch::{dispatch, Outcome};
use crate::mcp::handler::{ServerInfo, SharedHandler};
use crate::mcp::protocol::MCP_PROTOCOL_VERSION;
use crate::mcp::session::{SessionGuard, SessionRegistry, SessionSettings};

/// Header carrying the session id as an alternative to the query parameter.
pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
struct StreamableState {
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

/// HTTP and SSE on shared endpoints, with idle-session reaping.
#[derive(Debug)]
pub struct StreamableTransport {
    addr: String,
    cors: SharedCors,
    settings: SessionSettings,
    sessions: Arc<SessionRegistry>,
}

impl StreamableTransport {
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
        let state = StreamableState {
            info: Arc::new(info),
            handler,
            sessions: Arc::clone(&self.sessions),
            settings: self.settings,
            shutdown,
        };

        let protocol = Router::new()
            .route("/mcp", post(submit).options(web::preflight))
            .route("/stream", get(open_stream).options(web::preflight))
            .route("/messages", post(submit_for_session).options(web::preflight))
            .route_layer(from_fn_with_state(Arc::clone(&self.cors), web::cors_guard));

        Router::new()
            .merge(protocol)
            .route("/health", get(health))
            .with_state(state)
            .layer(DefaultBodyLimit::max(MAX_FRAME_SIZE))
            .layer(TraceLayer::new_for_http())
    }

    /// Closes and removes every session idle past the timeout. Returns how
    /// many were removed.
    pub fn reap_idle_sessions(&self) -> usize {
        reap(&self.sessions, self.settings.idle_timeout)
    }

    /// Starts the background reaper; it runs until `shutdown` is cancelled.
    pub fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let SessionSettings {
            idle_timeout,
            reap_interval,
            ..
        } = self.settings;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + reap_interval, reap_interval);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        reap(&sessions, idle_timeout);
                    }
                }
            }
            debug!("Session reaper stopped");
        })
    }
}

fn reap(sessions: &SessionRegistry, idle_timeout: Duration) -> usize {
    let removed = sessions.remove_expired(Instant::now(), idle_timeout);
    for id in &removed {
        info!(session_id = %id, "Reaped idle session");
    }
    removed.len()
}

#[async_trait]
impl Transport for StreamableTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Streamable
    }

    async fn start(
        &self,
        shutdown: CancellationToken,
        info: ServerInfo,
        handler: SharedHandler,
    ) -> Result<(), TransportError> {
        let router = self.router(shutdown.clone(), info, handler);
        let reaper = self.spawn_reaper(shutdown.clone());
        let sessions = Arc::clone(&self.sessions);

        let served = web::serve(&self.addr, router, shutdown, move || {
            let closed = sessions.close_all();
            info!(closed, "Streamable transport shutting down");
        })
        .await;

        reaper.abort();
        served
    }
}

/// Returns `true` if the client asked for the reply as an SSE event.
fn wants_stream(headers: &HeaderMap) -> bool {
    let accept = web::header_str(headers, ACCEPT.as_str());
    let connection = web::header_str(headers, CONNECTION.as_str());
    accept == Some("text/event-stream")
        || connection.is_some_and(|c| c.eq_ignore_ascii_case("keep-alive"))
}

/// `POST /mcp`
async fn submit(State(state): State<StreamableState>, headers: HeaderMap, body: Bytes) -> Response {
    let streaming = wants_stream(&headers);
    let ctx = web::request_context(&state.shutdown, TransportKind::Streamable, headers);
    let outcome = dispatch(state.handler.as_ref(), ctx, body.to_vec()).await;

    if !streaming {
        return web::reply(outcome);
    }
    match outcome {
        Outcome::NoReply => StatusCode::ACCEPTED.into_response(),
        Outcome::Reply(reply) => web::single_event("response", &reply),
        failed => failed.into_envelope().map_or_else(
            || StatusCode::ACCEPTED.into_response(),
            |envelope| web::single_event("error", &envelope),
        ),
    }
}

/// `GET /stream`
async fn open_stream(
    State(state): State<StreamableState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session, mut rx) = state.sessions.create();
    let guard = SessionGuard::new(Arc::clone(&state.sessions), session.id().to_string());
    info!(session_id = %session.id(), "Stream client connected");

    let init = json!({
        "type": "connection",
        "sessionId": session.id(),
        "server": state.info.name,
        "version": state.info.version,
        "protocol": MCP_PROTOCOL_VERSION,
    })
    .to_string();
    let shutdown = state.shutdown.clone();

    let stream = async_stream::stream! {
        let _guard = guard;

        yield Ok::<_, Infallible>(Event::default().event("init").data(init));

        loop {
            let message = tokio::select! {
                () = shutdown.cancelled() => None,
                () = session.closed() => None,
                message = rx.recv() => message,
            };
            let Some(message) = message else { break };
            yield Ok(Event::default()
                .event("message")
                .data(String::from_utf8_lossy(&message)));
        }

        debug!(session_id = %session.id(), "Stream ended");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.settings.keepalive)
            .text("heartbeat"),
    )
}

/// `POST /messages`, session id from `?sessionId=` or `Mcp-Session-Id`.
async fn submit_for_session(
    State(state): State<StreamableState>,
    Query(query): Query<MessagesQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let session_id = query
        .session_id
        .filter(|id| !id.is_empty())
        .or_else(|| web::header_str(&headers, SESSION_HEADER).map(str::to_string));
    let Some(session_id) = session_id else {
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

    let ctx = web::request_context(&state.shutdown, TransportKind::Streamable, headers);
    let handler = Arc::clone(&state.handler);
    tokio::spawn(async move {
        let outcome = dispatch(handler.as_ref(), ctx, body.to_vec()).await;
        session.touch();

        let Some(message) = web::push_message(outcome) else {
            return;
        };
        match session.try_send(message) {
            Ok(()) => {}
            Err(EnqueueError::Full) => {
                warn!(session_id = %session.id(), "Session queue full; dropping message");
            }
            Err(EnqueueError::Closed) => {
                debug!(session_id = %session.id(), "Session closed; dropping message");
            }
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
}

async fn health(State(state): State<StreamableState>) -> Response {
    Json(
        Health::new(&state.info)
            .protocol()
            .transport("streamable-http")
            .capabilities(Capabilities {
                streaming: true,
                http: true,
                sse: true,
            }),
    )
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::OriginAllowList;

    fn transport(settings: SessionSettings) -> StreamableTransport {
        StreamableTransport::new(
            "127.0.0.1:0",
            Arc::new(OriginAllowList::allow_all()),
            settings,
        )
    }

    #[test]
    fn negotiation() {
        let mut headers = HeaderMap::new();
        assert!(!wants_stream(&headers));

        headers.insert(ACCEPT, "application/json".parse().unwrap());
        assert!(!wants_stream(&headers));

        headers.insert(ACCEPT, "text/event-stream".parse().unwrap());
        assert!(wants_stream(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, "Keep-Alive".parse().unwrap());
        assert!(wants_stream(&headers));
    }

    #[tokio::test(start_paused = true)]
    async fn reap_removes_only_idle_sessions() {
        let transport = transport(SessionSettings {
            idle_timeout: Duration::from_secs(60),
            ..SessionSettings::default()
        });
        let (idle, _r1) = transport.sessions().create();
        tokio::time::advance(Duration::from_secs(45)).await;
        let (active, _r2) = transport.sessions().create();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(transport.reap_idle_sessions(), 1);
        assert!(idle.is_closed());
        assert!(transport.sessions().get(active.id()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_task_runs_on_interval() {
        let transport = transport(SessionSettings {
            idle_timeout: Duration::from_secs(600),
            reap_interval: Duration::from_secs(300),
            ..SessionSettings::default()
        });
        let (session, _rx) = transport.sessions().create();
        let shutdown = CancellationToken::new();
        let reaper = transport.spawn_reaper(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert!(transport.sessions().get(session.id()).is_some());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(transport.sessions().get(session.id()).is_none());

        shutdown.cancel();
        reaper.await.unwrap();
    }
}
