//! Plumbing shared by the HTTP-family transports.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::TransportKind;
use crate::error::{DecodeError, TransportError};
use crate::mcp::dispatch::Outcome;
use crate::mcp::handler::{RequestContext, ServerInfo};
use crate::mcp::protocol::MCP_PROTOCOL_VERSION;
use crate::security::{CorsDecision, CorsPolicy};

/// Shared CORS policy, the state of [`cors_guard`].
pub(super) type SharedCors = Arc<dyn CorsPolicy>;

/// Consults the CORS policy before the body is read.
///
/// Denied requests get 403. Preflight requests are answered here.
pub(super) async fn cors_guard(
    State(policy): State<SharedCors>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok());
    let decision = policy.decide(origin, request.method());

    let CorsDecision::Allow(headers) = decision else {
        warn!(
            origin = origin.unwrap_or_default(),
            path = %request.uri().path(),
            "CORS rejected origin"
        );
        return StatusCode::FORBIDDEN.into_response();
    };

    let mut response = if *request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };
    let response_headers = response.headers_mut();
    for (name, value) in headers {
        response_headers.insert(name, value);
    }
    response
}

/// Registered for `OPTIONS` on guarded routes so preflight requests reach
/// [`cors_guard`], which answers them.
pub(super) async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Binds `addr` and serves `router` until `shutdown` is cancelled.
///
/// `on_shutdown` runs as soon as cancellation is observed, before open
/// connections are drained.
pub(super) async fn serve<F>(
    addr: &str,
    router: Router,
    shutdown: CancellationToken,
    on_shutdown: F,
) -> Result<(), TransportError>
where
    F: FnOnce() + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    match listener.local_addr() {
        Ok(local) => info!(addr = %local, "Listening"),
        Err(_) => info!(addr, "Listening"),
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            on_shutdown();
        })
        .await
        .map_err(TransportError::Serve)
}

/// Context for a request arriving on an HTTP-family transport.
pub(super) fn request_context(
    shutdown: &CancellationToken,
    kind: TransportKind,
    headers: HeaderMap,
) -> RequestContext {
    RequestContext::http(shutdown.child_token(), kind, headers)
}

/// Maps a synchronous outcome onto an HTTP response.
///
/// Handler failures are reported as plain-text 500s rather than envelopes.
/// Undecodable JSON is a 400; a well-formed but invalid envelope gets its
/// `InvalidRequest` envelope with 200.
pub(super) fn reply(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Reply(body) => json_body(StatusCode::OK, body),
        Outcome::NoReply => StatusCode::ACCEPTED.into_response(),
        Outcome::Rejected(DecodeError::Parse(_)) => {
            (StatusCode::BAD_REQUEST, "Invalid JSON").into_response()
        }
        rejected @ Outcome::Rejected(_) => rejected
            .into_envelope()
            .map_or_else(|| StatusCode::BAD_REQUEST.into_response(), |b| {
                json_body(StatusCode::OK, b)
            }),
        Outcome::Failed { error, .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
        }
    }
}

/// A response with a JSON body delivered verbatim.
pub(super) fn json_body(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        Body::from(body),
    )
        .into_response()
}

/// Wraps an outcome as a `{"type": "response"|"error", "data": <envelope>}`
/// push message. Notifications produce nothing.
pub(super) fn push_message(outcome: Outcome) -> Option<Vec<u8>> {
    let (kind, envelope) = match outcome {
        Outcome::Reply(reply) => ("response", reply),
        Outcome::NoReply => return None,
        failed => ("error", failed.into_envelope()?),
    };

    let data = serde_json::from_slice::<Value>(&envelope)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&envelope).into_owned()));
    Some(json!({ "type": kind, "data": data }).to_string().into_bytes())
}

/// A one-event SSE response.
pub(super) fn single_event(name: &'static str, data: &[u8]) -> Response {
    let event = Event::default()
        .event(name)
        .data(String::from_utf8_lossy(data));
    Sse::new(futures::stream::once(async move {
        Ok::<_, Infallible>(event)
    }))
    .into_response()
}

/// Extracts a non-empty header value.
pub(super) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Capability flags reported by the streamable transport.
#[derive(Debug, Clone, Copy, Serialize)]
pub(super) struct Capabilities {
    pub streaming: bool,
    pub http: bool,
    pub sse: bool,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub(super) struct Health<'a> {
    status: &'static str,
    server: &'a str,
    version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transport: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capabilities: Option<Capabilities>,
}

impl<'a> Health<'a> {
    pub(super) fn new(info: &'a ServerInfo) -> Self {
        Self {
            status: "ok",
            server: &info.name,
            version: &info.version,
            protocol: None,
            transport: None,
            capabilities: None,
        }
    }

    pub(super) fn transport(mut self, transport: &'static str) -> Self {
        self.transport = Some(transport);
        self
    }

    pub(super) fn protocol(mut self) -> Self {
        self.protocol = Some(MCP_PROTOCOL_VERSION);
        self
    }

    pub(super) fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }
}
