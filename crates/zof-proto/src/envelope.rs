use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::Xid;

/// An outgoing request sent to the helper over its RPC channel.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub id: Xid,
    pub method: String,
    pub params: Value,
}

/// Serializes a request to the single-line JSON form the helper expects.
pub fn encode_request(request: &RpcRequest) -> Result<String, ProtocolError> {
    serde_json::to_string(request).map_err(ProtocolError::Encode)
}

/// A structured RPC error as reported by the helper.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A reply to a previously sent request, possibly one fragment of a
/// multipart sequence.
#[derive(Debug, Clone)]
pub struct RpcReply {
    pub id: Xid,
    pub outcome: Result<Value, RpcError>,
    /// True when the "more" flag was present — another fragment for this
    /// xid follows.
    pub more: bool,
}

/// A notification not correlated with any pending xid.
#[derive(Debug, Clone)]
pub struct RpcNotification {
    pub method: String,
    pub params: Value,
}

/// Either half of an incoming helper message.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Reply(RpcReply),
    Notification(RpcNotification),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed JSON from helper: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("helper message had neither `id` nor `method`: {0}")]
    Unrecognized(Value),
    #[error("reply id was not a valid xid: {0}")]
    InvalidXid(Value),
}

#[derive(Debug, Deserialize)]
struct RawReply {
    result: Option<Value>,
    error: Option<RpcError>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawNotification {
    method: String,
    #[serde(default)]
    params: Value,
}

/// Parses one JSON object already split out of the helper's byte stream by
/// the active [`crate::Framing`] strategy.
pub fn decode_message(value: Value) -> Result<IncomingMessage, ProtocolError> {
    let has_id = value.get("id").is_some();
    let has_method = value.get("method").is_some();

    if has_id {
        let id = value
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| ProtocolError::InvalidXid(value.clone()))?;
        let raw: RawReply = serde_json::from_value(value).map_err(ProtocolError::Decode)?;
        let more = raw.flags.iter().any(|f| f == "more");
        let outcome = match (raw.result, raw.error) {
            (_, Some(err)) => Err(err),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        };
        return Ok(IncomingMessage::Reply(RpcReply { id, outcome, more }));
    }

    if has_method {
        let raw: RawNotification = serde_json::from_value(value).map_err(ProtocolError::Decode)?;
        return Ok(IncomingMessage::Notification(RpcNotification {
            method: raw.method,
            params: raw.params,
        }));
    }

    Err(ProtocolError::Unrecognized(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_single_reply() {
        let value = json!({"id": 7, "result": {"ok": true}});
        match decode_message(value).unwrap() {
            IncomingMessage::Reply(reply) => {
                assert_eq!(reply.id, 7);
                assert!(!reply.more);
                assert_eq!(reply.outcome.unwrap(), json!({"ok": true}));
            }
            _ => panic!("expected reply"),
        }
    }

    #[test]
    fn decodes_multipart_fragment() {
        let value = json!({"id": 3, "result": {"ports": []}, "flags": ["more"]});
        match decode_message(value).unwrap() {
            IncomingMessage::Reply(reply) => assert!(reply.more),
            _ => panic!("expected reply"),
        }
    }

    #[test]
    fn decodes_error_reply() {
        let value = json!({"id": 1, "error": {"code": -1, "message": "bad"}});
        match decode_message(value).unwrap() {
            IncomingMessage::Reply(reply) => {
                let err = reply.outcome.unwrap_err();
                assert_eq!(err.code, -1);
                assert_eq!(err.message, "bad");
            }
            _ => panic!("expected reply"),
        }
    }

    #[test]
    fn decodes_notification() {
        let value = json!({"method": "OFP.MESSAGE", "params": {"type": "CHANNEL_UP", "conn_id": 1}});
        match decode_message(value).unwrap() {
            IncomingMessage::Notification(notification) => {
                assert_eq!(notification.method, "OFP.MESSAGE");
            }
            _ => panic!("expected notification"),
        }
    }

    #[test]
    fn rejects_garbage() {
        let value = json!({"foo": "bar"});
        assert!(decode_message(value).is_err());
    }

    #[test]
    fn encodes_request() {
        let request = RpcRequest {
            id: 5,
            method: "OFP.SEND".to_string(),
            params: json!({"type": "HELLO"}),
        };
        let encoded = encode_request(&request).unwrap();
        assert!(encoded.contains("\"id\":5"));
        assert!(encoded.contains("OFP.SEND"));
    }
}
