//! Model Context Protocol (MCP) transport layer.
//!
//! Moves JSON-RPC 2.0 envelopes between clients and a [`Handler`] over one of
//! four transports, selected at start-up.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Transports                           │
//! │   stdio  │  http (/mcp)  │  sse (/sse)  │  streamable (/mcp)  │
//! └─────┬─────────────┬─────────────┬───────────────┬─────────────┘
//!       │ framing     │             │ sessions      │ sessions + reaper
//!       ▼             ▼             ▼               ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │        dispatch: decode ─▶ Handler::handle ─▶ Outcome         │
//! └───────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                ┌──────────────────────────────┐
//!                │  McpServer (routing layer)   │
//!                └──────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2025-03-26.

pub mod dispatch;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use dispatch::{dispatch, Outcome};
pub use handler::{Handler, HandlerResult, RequestContext, ServerInfo, SharedHandler};
pub use protocol::{
    Envelope, ErrorCode, JsonRpcError, JsonRpcResponse, RequestId, MCP_PROTOCOL_VERSION,
};
pub use server::McpServer;
pub use session::{Session, SessionRegistry, SessionSettings};
pub use transport::{StdioTransport, Transport, TransportKind};
