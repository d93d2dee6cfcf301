//! Transports carrying JSON-RPC envelopes between client and handler.
//!
//! Four interchangeable transports implement [`Transport`]; exactly one is
//! selected per process run:
//!
//! | Kind         | Endpoints                                   | Reply delivery           |
//! |--------------|---------------------------------------------|--------------------------|
//! | `stdio`      | stdin / stdout                              | same stream              |
//! | `http`       | `POST /mcp`, `GET /health`                  | HTTP response body       |
//! | `sse`        | `GET /sse`, `POST /messages?sessionId=`     | push event on `/sse`     |
//! | `streamable` | `/mcp`, `GET /stream`, `POST /messages`     | body, single SSE event or push event |
//!
//! All of them run messages through [`crate::mcp::dispatch`], so the
//! protocol surface is identical regardless of transport.

pub mod framing;
pub mod http;
pub mod sse;
pub mod stdio;
pub mod streamable;
mod web;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::TransportError;
use crate::mcp::handler::{ServerInfo, SharedHandler};
use crate::security::{CorsPolicy, OriginAllowList};

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::{StdioTransport, StdioWriter};
pub use streamable::StreamableTransport;

/// A message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Serves requests until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] for transport-fatal failures such as a
    /// listener that cannot be bound.
    async fn start(
        &self,
        shutdown: CancellationToken,
        info: ServerInfo,
        handler: SharedHandler,
    ) -> Result<(), TransportError>;
}

/// The available transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Framed messages over stdin/stdout.
    #[default]
    Stdio,
    /// Synchronous request/response over HTTP.
    Http,
    /// Server-sent events with a separate submission endpoint.
    Sse,
    /// HTTP and SSE combined behind content negotiation.
    #[serde(alias = "streamable-http")]
    Streamable,
}

impl TransportKind {
    /// Returns `true` for the transports served over HTTP.
    #[must_use]
    pub const fn is_http_family(self) -> bool {
        !matches!(self, Self::Stdio)
    }

    /// The name used in configuration and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Sse => "sse",
            Self::Streamable => "streamable",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised transport name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transport type: {0} (expected stdio, http, sse or streamable)")]
pub struct UnknownTransport(String);

impl FromStr for TransportKind {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            "sse" => Ok(Self::Sse),
            "streamable" | "streamable-http" => Ok(Self::Streamable),
            _ => Err(UnknownTransport(s.to_string())),
        }
    }
}

/// Builds the transport selected by the configuration.
#[must_use]
pub fn from_config(config: &Config) -> Box<dyn Transport> {
    let addr = config.transport.bind_address();
    let cors: Arc<dyn CorsPolicy> = Arc::new(OriginAllowList::from(&config.security.cors));
    let sessions = config.sessions.settings();

    match config.transport.kind {
        TransportKind::Stdio => Box::new(StdioTransport::new().with_settings(config.stdio.settings())),
        TransportKind::Http => Box::new(HttpTransport::new(addr, cors)),
        TransportKind::Sse => Box::new(SseTransport::new(addr, cors, sessions)),
        TransportKind::Streamable => Box::new(StreamableTransport::new(addr, cors, sessions)),
    }
}
