//! JSON-RPC 2.0 envelope codec.
//!
//! Every transport carries the same envelope. This module parses raw bytes
//! into an [`Envelope`] and builds the success and error envelopes sent back.
//! It performs no I/O and does not interpret `method` or `params`.
//!
//! # Message Types
//!
//! - **Request**: has an `id`, always answered by exactly one envelope
//! - **Notification**: no `id`, never answered
//! - **Response**: `result` on success, `error` otherwise

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// The JSON-RPC version tag every envelope must carry.
pub const JSONRPC_VERSION: &str = "2.0";

/// The MCP protocol revision advertised in handshakes and health payloads.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

/// Server name for capability negotiation.
pub const SERVER_NAME: &str = "mcp-context-server";

/// Encoded when a reply cannot be serialised at all.
const FALLBACK_ERROR: &[u8] =
    br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// A JSON-RPC 2.0 request ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// A decoded request or notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// The method to invoke.
    pub method: String,

    /// Correlation id; `None` marks a notification.
    pub id: Option<RequestId>,

    /// Opaque parameters, passed through to the handler.
    pub params: Option<Value>,
}

impl Envelope {
    /// Returns `true` if this envelope expects no reply.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Decodes raw bytes into an [`Envelope`].
///
/// The version tag is read from `jsonrpc`; `protocol` is accepted as an alias.
///
/// # Errors
///
/// Returns [`DecodeError::Parse`] if the bytes are not a JSON object and
/// [`DecodeError::InvalidRequest`] if the version tag is missing or wrong,
/// the id has the wrong type, or `method` is missing.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Parse(e.to_string()))?;

    let Value::Object(mut obj) = value else {
        return Err(DecodeError::Parse("expected a JSON object".to_string()));
    };

    let id = take_id(&mut obj)?;

    let version = obj
        .get("jsonrpc")
        .or_else(|| obj.get("protocol"))
        .and_then(Value::as_str);
    if version != Some(JSONRPC_VERSION) {
        return Err(DecodeError::InvalidRequest {
            id,
            reason: format!("jsonrpc field must be \"{JSONRPC_VERSION}\""),
        });
    }

    let method = match obj.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => method,
        _ => {
            return Err(DecodeError::InvalidRequest {
                id,
                reason: "method must be a non-empty string".to_string(),
            })
        }
    };

    Ok(Envelope {
        method,
        id,
        params: obj.remove("params"),
    })
}

/// Extracts the correlation id, rejecting ids that are neither strings nor integers.
fn take_id(obj: &mut Map<String, Value>) -> Result<Option<RequestId>, DecodeError> {
    match obj.remove("id") {
        None => Ok(None),
        Some(raw) => serde_json::from_value(raw)
            .map(Some)
            .map_err(|_| DecodeError::InvalidRequest {
                id: None,
                reason: "id must be a string or an integer".to_string(),
            }),
    }
}

/// Standard JSON-RPC 2.0 error codes plus the application-reserved codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received by the server.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// The caller failed authentication.
    Unauthorized,
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Unauthorized => -32000,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::Unauthorized => "Unauthorized",
        }
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }

    /// Serialises the response.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        to_bytes(self)
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self::with_message(code, code.default_message())
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Adds additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A JSON-RPC 2.0 error response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this error corresponds to; `null` when unknown.
    pub id: Option<RequestId>,

    /// The error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }

    /// Creates a parse error response (ID cannot be determined).
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::from_code(ErrorCode::ParseError))
    }

    /// Creates a method not found error response.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(
                ErrorCode::MethodNotFound,
                format!("Method not found: {method}"),
            ),
        )
    }

    /// Creates an invalid params error response.
    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, message),
        )
    }

    /// Creates an internal error response.
    #[must_use]
    pub fn internal_error(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::with_message(ErrorCode::InternalError, message),
        )
    }

    /// Creates an unauthorized error response.
    #[must_use]
    pub fn unauthorized(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::with_message(ErrorCode::Unauthorized, message),
        )
    }

    /// Serialises the error response.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        to_bytes(self)
    }
}

impl From<&DecodeError> for JsonRpcError {
    fn from(error: &DecodeError) -> Self {
        let code = error.code();
        let data = match error {
            DecodeError::Parse(_) => JsonRpcErrorData::from_code(code),
            DecodeError::InvalidRequest { reason, .. } => {
                JsonRpcErrorData::from_code(code).with_data(Value::String(reason.clone()))
            }
        };
        Self::new(error.id().cloned(), data)
    }
}

/// An outgoing JSON-RPC 2.0 notification (server to client).
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingNotification {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OutgoingNotification {
    /// Creates a new outgoing notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    /// Serialises the notification.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        to_bytes(self)
    }
}

/// Builds a success envelope.
#[must_use]
pub fn encode_success(id: RequestId, result: Value) -> Vec<u8> {
    JsonRpcResponse::success(id, result).to_bytes()
}

/// Builds an error envelope with the code's message or a custom one.
#[must_use]
pub fn encode_error(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Vec<u8> {
    JsonRpcError::new(id, JsonRpcErrorData::with_message(code, message)).to_bytes()
}

fn to_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialise envelope");
        FALLBACK_ERROR.to_vec()
    })
}
