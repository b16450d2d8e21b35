//! Error types for the connection, codec and RPC layers.

use crate::protocol::ErrorInfo;

/// Failure of the underlying transport connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The connection is closed; pending operations unblock with this.
    #[error("connection closed")]
    Closed,

    #[error("i/o error")]
    Io(#[from] std::io::Error),

    /// Malformed framing on the wire (bad length prefix, unknown tag).
    #[error("malformed frame: {0}")]
    Frame(String),

    #[cfg(feature = "websocket")]
    #[error("websocket error")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Failure to encode or decode a message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json error")]
    Json(#[from] serde_json::Error),

    #[error("base64 error")]
    Base64(#[from] base64::DecodeError),

    /// The frame kind (text vs binary) does not match what this codec emits.
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(&'static str),

    /// Codec identifiers are ASCII tokens without `;` or `/`.
    #[error("invalid codec name: {0:?}")]
    InvalidName(String),

    /// No codec registered under this identifier.
    #[error("unknown codec: {0:?}")]
    Unknown(String),
}

/// Umbrella error surfaced by RPC operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The peer did not complete the SIMPLEX handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The remote side answered the call with an error reply.
    #[error("remote error: {0}")]
    Remote(ErrorInfo),

    /// An operation restricted to reply-role channels was used on a
    /// request-role channel.
    #[error("not a reply channel")]
    NotReplyChannel,

    /// An inbound message violated protocol invariants.
    #[error("bad message: {0}")]
    BadMessage(&'static str),

    /// The peer was closed while the operation was pending.
    #[error("peer closed")]
    Closed,

    #[error("receive timed out")]
    Timeout,
}

impl RpcError {
    /// The error object from an error reply, if that is what this is.
    pub fn remote(&self) -> Option<&ErrorInfo> {
        match self {
            RpcError::Remote(info) => Some(info),
            _ => None,
        }
    }
}
