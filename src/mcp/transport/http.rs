//! Synchronous HTTP transport.
//!
//! - `POST /mcp`: one envelope in, the handler's reply out, verbatim
//! - `GET /health`: server name and version, never touches the handler

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::HeaderMap;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::framing::MAX_FRAME_SIZE;
use super::web::{self, Health, SharedCors};
use super::{Transport, TransportKind};
use crate::error::TransportError;
use crate::mcp::dispatch::dispatch;
use crate::mcp::handler::{ServerInfo, SharedHandler};

#[derive(Clone)]
struct HttpState {
    info: Arc<ServerInfo>,
    handler: SharedHandler,
    shutdown: CancellationToken,
}

/// Plain request/response over HTTP.
#[derive(Debug)]
pub struct HttpTransport {
    addr: String,
    cors: SharedCors,
}

impl HttpTransport {
    /// Creates a transport that will listen on `addr`.
    pub fn new(addr: impl Into<String>, cors: SharedCors) -> Self {
        Self {
            addr: addr.into(),
            cors,
        }
    }

    /// Builds the routes without binding a socket.
    pub fn router(
        &self,
        shutdown: CancellationToken,
        info: ServerInfo,
        handler: SharedHandler,
    ) -> Router {
        let state = HttpState {
            info: Arc::new(info),
            handler,
            shutdown,
        };

        let protocol = Router::new()
            .route("/mcp", post(submit).options(web::preflight))
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
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn start(
        &self,
        shutdown: CancellationToken,
        info: ServerInfo,
        handler: SharedHandler,
    ) -> Result<(), TransportError> {
        let router = self.router(shutdown.clone(), info, handler);
        web::serve(&self.addr, router, shutdown, || {
            info!("HTTP transport shutting down");
        })
        .await
    }
}

async fn submit(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    let ctx = web::request_context(&state.shutdown, TransportKind::Http, headers);
    web::reply(dispatch(state.handler.as_ref(), ctx, body.to_vec()).await)
}

async fn health(State(state): State<HttpState>) -> Response {
    Json(Health::new(&state.info)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::OriginAllowList;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let cors = Arc::new(OriginAllowList::new(vec!["https://allowed.example".into()]));
        let handler: SharedHandler = Arc::new(
            |_ctx: crate::mcp::RequestContext, request: Vec<u8>| async move {
                Ok::<_, crate::error::HandlerError>(Some(request))
            },
        );
        HttpTransport::new("127.0.0.1:0", cors).router(
            CancellationToken::new(),
            ServerInfo::new("test", "0.0.0", ""),
            handler,
        )
    }

    #[tokio::test]
    async fn get_on_mcp_is_method_not_allowed() {
        let response = router()
            .oneshot(Request::get("/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn denied_origin_is_forbidden() {
        let response = router()
            .oneshot(
                Request::post("/mcp")
                    .header("Origin", "https://evil.example")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn preflight_is_answered() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/mcp")
                    .header("Origin", "https://allowed.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://allowed.example"
        );
    }

    #[tokio::test]
    async fn health_ignores_cors() {
        let response = router()
            .oneshot(
                Request::get("/health")
                    .header("Origin", "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
