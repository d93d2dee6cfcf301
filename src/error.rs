//! Error types for mcp-context-server.
//!
//! Transport-fatal errors ([`TransportError`]) surface from `Transport::start`.
//! Everything else is converted into a JSON-RPC error envelope or an HTTP
//! status by the transport that observed it.

use std::path::PathBuf;

use thiserror::Error;

use crate::mcp::protocol::{ErrorCode, RequestId};

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Failure to decode a raw message into an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not a JSON object.
    #[error("parse error: {0}")]
    Parse(String),

    /// Well-formed JSON that is not a valid request envelope.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Request id, when one could be recovered.
        id: Option<RequestId>,
        /// What was wrong with the envelope.
        reason: String,
    },
}

impl DecodeError {
    /// Returns the JSON-RPC error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ParseError,
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
        }
    }

    /// Returns the request id to echo, if any.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Parse(_) => None,
            Self::InvalidRequest { id, .. } => id.as_ref(),
        }
    }
}

/// Failure to read one frame from the stdio stream.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The stream ended before any byte of a new frame.
    #[error("end of stream")]
    Eof,

    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame")]
    Truncated,

    /// Header block without a `Content-Length` header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// `Content-Length` value is not a byte count.
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// Declared frame exceeds the size cap; the body was discarded.
    #[error("frame of {length} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Declared length.
        length: usize,
        /// Maximum accepted length.
        limit: usize,
    },

    /// Any other read failure.
    #[error("read failed")]
    Io(#[source] std::io::Error),
}

impl FrameError {
    /// Returns `true` for malformed input, as opposed to stream conditions.
    #[must_use]
    pub const fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::Truncated
                | Self::MissingContentLength
                | Self::InvalidContentLength(_)
                | Self::TooLarge { .. }
        )
    }
}

/// Error returned by a request handler.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler failed while processing the request.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Creates a handler failure with the given message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Failure to enqueue an outbound message on a session.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The session's queue is at capacity.
    #[error("session queue is full")]
    Full,

    /// The session has been closed.
    #[error("session is closed")]
    Closed,
}

/// Transport-fatal errors, propagated out of `Transport::start`.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("server error")]
    Serve(#[source] std::io::Error),

    /// `start` was called on a transport that is already running.
    #[error("transport already started")]
    AlreadyStarted,

    /// Process stream failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/config.json"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("config.json"));
    }

    #[test]
    fn validation_error_display() {
        let error = ConfigError::ValidationError {
            message: "invalid setting".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("invalid setting"));
    }

    #[test]
    fn decode_error_codes() {
        assert_eq!(
            DecodeError::Parse("x".into()).code(),
            ErrorCode::ParseError
        );
        let invalid = DecodeError::InvalidRequest {
            id: Some(RequestId::Number(3)),
            reason: "bad".into(),
        };
        assert_eq!(invalid.code(), ErrorCode::InvalidRequest);
        assert_eq!(invalid.id(), Some(&RequestId::Number(3)));
    }

    #[test]
    fn framing_errors_are_classified() {
        assert!(FrameError::MissingContentLength.is_framing());
        assert!(FrameError::Truncated.is_framing());
        assert!(!FrameError::Eof.is_framing());
        assert!(!FrameError::Io(std::io::Error::other("boom")).is_framing());
    }

    #[test]
    fn bind_error_names_address() {
        let error = TransportError::Bind {
            addr: "127.0.0.1:3000".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(error.to_string().contains("127.0.0.1:3000"));
    }
}
