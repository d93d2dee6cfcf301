//! Minimal MCP routing layer.
//!
//! [`McpServer`] is the [`Handler`] the binary runs behind whichever
//! transport is configured. It answers the lifecycle methods and advertises
//! whatever tool definitions it was built with (none by default):
//!
//! | Method            | Reply                                            |
//! |-------------------|--------------------------------------------------|
//! | `initialize`      | protocol version, capabilities, server info      |
//! | `ping`            | `{}`                                             |
//! | `tools/list`      | the registered definitions                       |
//! | `tools/call`      | `isError` result naming the tool                 |
//! | `notifications/*` | nothing                                          |
//! | anything else     | `MethodNotFound`                                 |
//!
//! Requests arriving over an HTTP-family transport are checked by the
//! configured [`Authenticator`] first.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::HandlerError;
use crate::mcp::handler::{Handler, HandlerResult, RequestContext, ServerInfo};
use crate::mcp::protocol::{self, Envelope, JsonRpcError, RequestId, MCP_PROTOCOL_VERSION};
use crate::security::{AuthOutcome, Authenticator};

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ToolCapabilities::default()),
        }
    }
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request. All optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// A tool definition for tools/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

/// The routing-layer handler.
pub struct McpServer {
    info: ServerInfo,
    tools: Vec<ToolDefinition>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl McpServer {
    /// Creates a server with no tools and no authentication.
    #[must_use]
    pub const fn new(info: ServerInfo) -> Self {
        Self {
            info,
            tools: Vec::new(),
            authenticator: None,
        }
    }

    /// Advertises `tools` from `tools/list`.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Requires HTTP-family requests to pass `authenticator`.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Server metadata returned by `initialize`.
    #[must_use]
    pub const fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Returns the rejection reason if the request fails authentication.
    fn check_auth(&self, ctx: &RequestContext) -> Option<String> {
        let authenticator = self.authenticator.as_ref()?;
        if !ctx.transport().is_http_family() {
            return None;
        }

        let empty = HeaderMap::new();
        match authenticator.authenticate(ctx.headers().unwrap_or(&empty)) {
            AuthOutcome::Accepted(identity) => {
                debug!(subject = %identity.subject, "Request authenticated");
                None
            }
            AuthOutcome::Rejected(reason) => Some(reason),
        }
    }

    fn route(&self, envelope: &Envelope, id: &RequestId) -> Result<Value, JsonRpcError> {
        match envelope.method.as_str() {
            "initialize" => self.handle_initialize(envelope, id),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools })),
            "tools/call" => self.handle_tools_call(envelope, id),
            method => Err(JsonRpcError::method_not_found(id.clone(), method)),
        }
    }

    fn handle_initialize(&self, envelope: &Envelope, id: &RequestId) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = envelope
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(id.clone(), format!("Invalid initialize params: {e}"))
            })?
            .unwrap_or_default();

        if let Some(client) = &params.client_info {
            info!(
                client = %client.name,
                client_version = client.version.as_deref().unwrap_or("unknown"),
                requested = params.protocol_version.as_deref().unwrap_or("none"),
                "Client initialising"
            );
        }

        let mut result = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": ServerCapabilities::default(),
            "serverInfo": {
                "name": self.info.name,
                "version": self.info.version,
            },
        });
        if !self.info.instructions.is_empty() {
            result["instructions"] = Value::String(self.info.instructions.clone());
        }
        Ok(result)
    }

    fn handle_tools_call(&self, envelope: &Envelope, id: &RequestId) -> Result<Value, JsonRpcError> {
        let params: ToolCallParams = envelope
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcError::invalid_params(id.clone(), format!("Invalid tool call params: {e}"))
            })?
            .ok_or_else(|| JsonRpcError::invalid_params(id.clone(), "Missing tool call params"))?;

        // Definitions are advertised only; no tool runs in this layer.
        let result = if self.tools.iter().any(|tool| tool.name == params.name) {
            ToolCallResult::error(format!("Tool not callable: {}", params.name))
        } else {
            ToolCallResult::error(format!("Unknown tool: {}", params.name))
        };
        serde_json::to_value(&result).map_err(|e| {
            JsonRpcError::internal_error(Some(id.clone()), format!("Failed to serialise result: {e}"))
        })
    }
}

#[async_trait]
impl Handler for McpServer {
    async fn handle(&self, ctx: RequestContext, request: Vec<u8>) -> HandlerResult {
        let envelope =
            protocol::decode(&request).map_err(|e| HandlerError::failed(e.to_string()))?;

        if let Some(reason) = self.check_auth(&ctx) {
            warn!(method = %envelope.method, reason = %reason, "Rejected unauthenticated request");
            return Ok(envelope
                .id
                .map(|id| JsonRpcError::unauthorized(Some(id), reason).to_bytes()));
        }

        let Some(id) = envelope.id.clone() else {
            debug!(method = %envelope.method, "Notification received");
            return Ok(None);
        };

        let reply = match self.route(&envelope, &id) {
            Ok(result) => protocol::encode_success(id, result),
            Err(error) => error.to_bytes(),
        };
        Ok(Some(reply))
    }
}
