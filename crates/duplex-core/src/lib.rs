#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod channel;
mod codec;
mod connection;
mod error;
mod frame;
mod peer;
mod protocol;
mod rpc;

pub use channel::{Channel, Role};
pub use codec::{Base64JsonCodec, Codec, CodecRegistry, JsonCodec, is_valid_codec_name};
pub use connection::Connection;
pub use error::{CodecError, ConnectionError, RpcError};
pub use frame::Frame;
pub use peer::Peer;
pub use protocol::{
    ErrorInfo, HANDSHAKE_ACCEPT, Message, MsgType, PROTOCOL_NAME, PROTOCOL_VERSION, codes,
    handshake_line, parse_handshake_line,
};
pub use rpc::{Handler, HandlerFuture, Rpc};

#[cfg(feature = "mem")]
pub use connection::mem::MemConnection;
#[cfg(feature = "stream")]
pub use connection::stream::StreamConnection;
#[cfg(feature = "testkit")]
pub use connection::testkit::ScriptedConnection;
#[cfg(feature = "websocket")]
pub use connection::websocket::WsConnection;

// Payloads are schemaless JSON values; re-exported so downstream code and
// tests don't need a direct serde_json dependency.
pub use serde_json::{Value, json};
