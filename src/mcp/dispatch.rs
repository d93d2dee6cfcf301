//! Decode, invoke, classify.
//!
//! Every transport runs a raw message through [`dispatch`] and then maps the
//! [`Outcome`] onto its own delivery channel. The reply invariants live here:
//! a request with an id gets exactly one envelope, a notification gets none.

use tracing::{debug, warn};

use crate::error::{DecodeError, HandlerError};
use crate::mcp::handler::{Handler, RequestContext};
use crate::mcp::protocol::{self, JsonRpcError, RequestId};

/// What a transport should deliver for one raw message.
#[derive(Debug)]
pub enum Outcome {
    /// The handler's reply, to be delivered verbatim.
    Reply(Vec<u8>),
    /// A notification; nothing is delivered.
    NoReply,
    /// The message could not be decoded; the handler was not invoked.
    Rejected(DecodeError),
    /// The handler failed for a request that expects a reply.
    Failed {
        /// Id of the failed request.
        id: Option<RequestId>,
        /// The handler's error.
        error: HandlerError,
    },
}

impl Outcome {
    /// Converts the outcome into the envelope to deliver, if any.
    ///
    /// Decode failures become `ParseError`/`InvalidRequest` envelopes and
    /// handler failures become `InternalError` envelopes carrying the request id.
    #[must_use]
    pub fn into_envelope(self) -> Option<Vec<u8>> {
        match self {
            Self::Reply(reply) => Some(reply),
            Self::NoReply => None,
            Self::Rejected(error) => Some(JsonRpcError::from(&error).to_bytes()),
            Self::Failed { id, error } => {
                Some(JsonRpcError::internal_error(id, error.to_string()).to_bytes())
            }
        }
    }
}

/// Decodes `raw`, invokes the handler and classifies the result.
pub async fn dispatch(handler: &dyn Handler, ctx: RequestContext, raw: Vec<u8>) -> Outcome {
    let envelope = match protocol::decode(&raw) {
        Ok(envelope) => envelope,
        Err(error) => {
            debug!(error = %error, "Rejecting undecodable message");
            return Outcome::Rejected(error);
        }
    };

    let method = envelope.method;
    let id = envelope.id;

    match (handler.handle(ctx, raw).await, id) {
        (Ok(Some(reply)), Some(_)) => Outcome::Reply(reply),
        (Ok(Some(_)), None) => {
            debug!(method = %method, "Discarding reply to notification");
            Outcome::NoReply
        }
        (Ok(None), Some(id)) => {
            warn!(method = %method, id = %id, "Handler produced no reply for a request");
            Outcome::Failed {
                id: Some(id),
                error: HandlerError::failed("handler produced no response"),
            }
        }
        (Ok(None), None) => Outcome::NoReply,
        (Err(error), Some(id)) => {
            warn!(method = %method, id = %id, error = %error, "Handler failed");
            Outcome::Failed {
                id: Some(id),
                error,
            }
        }
        (Err(error), None) => {
            warn!(method = %method, error = %error, "Handler failed for notification");
            Outcome::NoReply
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::ErrorCode;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    fn ctx() -> RequestContext {
        RequestContext::stdio(CancellationToken::new())
    }

    async fn echo(_ctx: RequestContext, request: Vec<u8>) -> crate::mcp::HandlerResult {
        let envelope = protocol::decode(&request).map_err(|e| HandlerError::failed(e.to_string()))?;
        Ok(envelope
            .id
            .map(|id| protocol::encode_success(id, json!({"method": envelope.method}))))
    }

    async fn always_reply(_ctx: RequestContext, _request: Vec<u8>) -> crate::mcp::HandlerResult {
        Ok(Some(b"{}".to_vec()))
    }

    async fn never_reply(_ctx: RequestContext, _request: Vec<u8>) -> crate::mcp::HandlerResult {
        Ok(None)
    }

    async fn fail(_ctx: RequestContext, _request: Vec<u8>) -> crate::mcp::HandlerResult {
        Err(HandlerError::failed("disk on fire"))
    }

    fn parse(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn request_gets_reply_with_same_id() {
        let raw = br#"{"jsonrpc":"2.0","id":"r-1","method":"ping"}"#.to_vec();
        let reply = dispatch(&echo, ctx(), raw).await.into_envelope().unwrap();
        assert_eq!(parse(&reply)["id"], "r-1");
    }

    #[tokio::test]
    async fn notification_never_gets_reply() {
        let raw = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#.to_vec();
        assert!(dispatch(&always_reply, ctx(), raw.clone())
            .await
            .into_envelope()
            .is_none());
        assert!(dispatch(&fail, ctx(), raw).await.into_envelope().is_none());
    }

    #[tokio::test]
    async fn parse_failure_has_null_id() {
        let reply = dispatch(&echo, ctx(), b"{broken".to_vec())
            .await
            .into_envelope()
            .unwrap();
        let value = parse(&reply);
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], ErrorCode::ParseError.code());
    }

    #[tokio::test]
    async fn wrong_version_is_invalid_request() {
        let raw = br#"{"jsonrpc":"1.0","id":1,"method":"initialize"}"#.to_vec();
        let outcome = dispatch(&echo, ctx(), raw).await;
        assert!(matches!(outcome, Outcome::Rejected(DecodeError::InvalidRequest { .. })));

        let value = parse(&outcome.into_envelope().unwrap());
        assert_eq!(value["id"], 1);
        assert_eq!(value["error"]["code"], ErrorCode::InvalidRequest.code());
    }

    #[tokio::test]
    async fn handler_error_becomes_internal_error() {
        let raw = br#"{"jsonrpc":"2.0","id":5,"method":"tools/call"}"#.to_vec();
        let value = parse(&dispatch(&fail, ctx(), raw).await.into_envelope().unwrap());
        assert_eq!(value["id"], 5);
        assert_eq!(value["error"]["code"], ErrorCode::InternalError.code());
        assert_eq!(value["error"]["message"], "disk on fire");
    }

    #[tokio::test]
    async fn missing_reply_to_request_is_internal_error() {
        let raw = br#"{"jsonrpc":"2.0","id":6,"method":"ping"}"#.to_vec();
        let value = parse(&dispatch(&never_reply, ctx(), raw).await.into_envelope().unwrap());
        assert_eq!(value["id"], 6);
        assert_eq!(value["error"]["code"], ErrorCode::InternalError.code());
    }
}
