//! The handler contract shared by every transport.
//!
//! A transport hands each raw request to a [`Handler`] together with a
//! [`RequestContext`] and delivers whatever bytes come back. `Ok(None)` means
//! the request was a notification and nothing is sent.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::mcp::transport::TransportKind;

/// Result type returned by handlers.
pub type HandlerResult = Result<Option<Vec<u8>>, HandlerError>;

/// A handler shared between concurrently running requests.
pub type SharedHandler = Arc<dyn Handler>;

/// Processes one raw request.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles a raw request and returns the raw reply, or `None` for notifications.
    async fn handle(&self, ctx: RequestContext, request: Vec<u8>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(RequestContext, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, ctx: RequestContext, request: Vec<u8>) -> HandlerResult {
        (self)(ctx, request).await
    }
}

/// Per-request context passed to the handler.
///
/// The HTTP headers are carried explicitly so collaborators such as the
/// authenticator never have to look them up from ambient state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    transport: TransportKind,
    headers: Option<HeaderMap>,
}

impl RequestContext {
    /// Context for a request read from a process stream.
    #[must_use]
    pub fn stdio(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            transport: TransportKind::Stdio,
            headers: None,
        }
    }

    /// Context for a request received over an HTTP-family transport.
    #[must_use]
    pub fn http(cancel: CancellationToken, transport: TransportKind, headers: HeaderMap) -> Self {
        Self {
            cancel,
            transport,
            headers: Some(headers),
        }
    }

    /// Token cancelled when the transport shuts down.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The transport the request arrived on.
    #[must_use]
    pub const fn transport(&self) -> TransportKind {
        self.transport
    }

    /// HTTP request headers, if the request arrived over HTTP.
    #[must_use]
    pub const fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }
}

/// Static server metadata handed to every transport at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
    /// Human-readable usage instructions.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instructions: String,
}

impl ServerInfo {
    /// Creates server metadata.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            instructions: instructions.into(),
        }
    }
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self::new(
            crate::mcp::protocol::SERVER_NAME,
            env!("CARGO_PKG_VERSION"),
            "Exposes project context tools to AI assistants.",
        )
    }
}
