//! SIMPLEX/1.0 message shapes, constructors and handshake strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_NAME: &str = "SIMPLEX";
pub const PROTOCOL_VERSION: &str = "1.0";

/// Server's positive handshake response. Anything not starting with `+`
/// is a handshake failure.
pub const HANDSHAKE_ACCEPT: &str = "+OK";

/// Well-known error codes carried in error replies.
pub mod codes {
    /// Inbound request named a method with no registered handler.
    pub const METHOD_MISSING: i64 = -32601;
    /// A handler failed while serving the request.
    pub const INTERNAL: i64 = -32603;
}

/// Message discriminator: every frame is a request or a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    Req,
    Rep,
}

/// Error object carried by an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorInfo {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// One SIMPLEX message, the unit a codec turns into a transport frame.
///
/// Optional fields absent on the wire stay `None` here; constructors never
/// emit null sentinels, so messages round-trip through strict codecs.
/// `more` is only serialized when `true`: the last frame of a stream
/// carries no `more` key at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MsgType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(
        default,
        deserialize_with = "nullable_payload",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// An absent payload and an explicit null payload are different things: a
/// present key always deserializes to `Some`, so null payloads round-trip.
fn nullable_payload<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Message {
    /// A request frame. `id` is required for any call that streams or
    /// expects a reply; `more` marks non-terminal frames of a request
    /// stream.
    pub fn request(
        payload: Value,
        method: impl Into<String>,
        id: Option<u64>,
        more: bool,
        ext: Option<Value>,
    ) -> Self {
        Self {
            kind: MsgType::Req,
            method: Some(method.into()),
            id,
            payload: Some(payload),
            more,
            ext,
            error: None,
        }
    }

    /// A reply frame for the call correlated by `id`.
    pub fn reply(id: u64, payload: Value, more: bool, ext: Option<Value>) -> Self {
        Self {
            kind: MsgType::Rep,
            method: None,
            id: Some(id),
            payload: Some(payload),
            more,
            ext,
            error: None,
        }
    }

    /// An error reply. Carries no payload; terminal for its channel.
    pub fn error_reply(id: u64, error: ErrorInfo, ext: Option<Value>) -> Self {
        Self {
            kind: MsgType::Rep,
            method: None,
            id: Some(id),
            payload: None,
            more: false,
            ext,
            error: Some(error),
        }
    }
}

/// The client's opening frame: `SIMPLEX/1.0;<codec-name>`.
pub fn handshake_line(codec: &str) -> String {
    format!("{PROTOCOL_NAME}/{PROTOCOL_VERSION};{codec}")
}

/// Extract the codec name from a client handshake line, if well-formed.
pub fn parse_handshake_line(line: &str) -> Option<&str> {
    line.strip_prefix(PROTOCOL_NAME)?
        .strip_prefix('/')?
        .strip_prefix(PROTOCOL_VERSION)?
        .strip_prefix(';')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let msg = Message::request(json!(5), "count", Some(1), false, None);
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"req","method":"count","id":1,"payload":5}"#
        );
    }

    #[test]
    fn streamed_reply_wire_shape() {
        let msg = Message::reply(1, json!({"num": 1}), true, None);
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"rep","id":1,"payload":{"num":1},"more":true}"#
        );
    }

    #[test]
    fn terminal_reply_omits_more() {
        let msg = Message::reply(1, json!({"num": 5}), false, None);
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"rep","id":1,"payload":{"num":5}}"#
        );
    }

    #[test]
    fn error_reply_wire_shape() {
        let msg = Message::error_reply(1, ErrorInfo::new(codes::METHOD_MISSING, "method missing"), None);
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"rep","id":1,"error":{"code":-32601,"message":"method missing"}}"#
        );
    }

    #[test]
    fn absent_more_deserializes_false() {
        let msg: Message =
            serde_json::from_str(r#"{"type":"rep","id":3,"payload":null}"#).unwrap();
        assert!(!msg.more);
        assert_eq!(msg.id, Some(3));
        assert_eq!(msg.payload, Some(Value::Null));
    }

    #[test]
    fn handshake_line_format() {
        assert_eq!(handshake_line("json"), "SIMPLEX/1.0;json");
        assert_eq!(parse_handshake_line("SIMPLEX/1.0;json"), Some("json"));
        assert_eq!(parse_handshake_line("SIMPLEX/1.0;b64json"), Some("b64json"));
        assert_eq!(parse_handshake_line("SIMPLEX/2.0;json"), None);
        assert_eq!(parse_handshake_line("+OK"), None);
    }

    #[test]
    fn messages_round_trip() {
        let msgs = [
            Message::request(json!({"foo": "bar"}), "echo", Some(1), true, Some(json!({"k": 1}))),
            Message::request(Value::Null, "fire", None, false, None),
            Message::reply(7, json!([1, 2, 3]), false, None),
            Message::error_reply(2, ErrorInfo::with_data(-1, "boom", json!("ctx")), None),
        ];
        for msg in msgs {
            let encoded = serde_json::to_string(&msg).unwrap();
            let decoded: Message = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, msg);
        }
    }
}
