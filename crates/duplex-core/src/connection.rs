//! Connection enum and internal backend trait.
//!
//! The public API is the [`Connection`] enum: an abstract duplex frame
//! channel with `send`, `recv` and `close`. Each backend lives in its own
//! module under `connection/` behind a cargo feature and implements the
//! internal [`ConnectionBackend`] trait.

use crate::error::ConnectionError;
use crate::frame::Frame;

pub(crate) trait ConnectionBackend: Send + Sync + Clone + 'static {
    async fn send(&self, frame: Frame) -> Result<(), ConnectionError>;
    async fn recv(&self) -> Result<Frame, ConnectionError>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

#[derive(Clone, Debug)]
pub enum Connection {
    #[cfg(feature = "mem")]
    Mem(mem::MemConnection),
    #[cfg(feature = "stream")]
    Stream(stream::StreamConnection),
    #[cfg(feature = "websocket")]
    WebSocket(websocket::WsConnection),
    #[cfg(feature = "testkit")]
    Scripted(testkit::ScriptedConnection),
}

impl Connection {
    /// Deliver one frame reliably to the peer.
    pub async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        match self {
            #[cfg(feature = "mem")]
            Connection::Mem(c) => c.send(frame).await,
            #[cfg(feature = "stream")]
            Connection::Stream(c) => c.send(frame).await,
            #[cfg(feature = "websocket")]
            Connection::WebSocket(c) => c.send(frame).await,
            #[cfg(feature = "testkit")]
            Connection::Scripted(c) => c.send(frame).await,
        }
    }

    /// Block for one inbound frame. An empty frame is a spurious empty
    /// message (the router ignores those); `ConnectionError::Closed` means
    /// the transport is gone.
    pub async fn recv(&self) -> Result<Frame, ConnectionError> {
        match self {
            #[cfg(feature = "mem")]
            Connection::Mem(c) => c.recv().await,
            #[cfg(feature = "stream")]
            Connection::Stream(c) => c.recv().await,
            #[cfg(feature = "websocket")]
            Connection::WebSocket(c) => c.recv().await,
            #[cfg(feature = "testkit")]
            Connection::Scripted(c) => c.recv().await,
        }
    }

    /// Idempotent teardown. Pending operations unblock with
    /// `ConnectionError::Closed`.
    pub fn close(&self) {
        match self {
            #[cfg(feature = "mem")]
            Connection::Mem(c) => c.close(),
            #[cfg(feature = "stream")]
            Connection::Stream(c) => c.close(),
            #[cfg(feature = "websocket")]
            Connection::WebSocket(c) => c.close(),
            #[cfg(feature = "testkit")]
            Connection::Scripted(c) => c.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            #[cfg(feature = "mem")]
            Connection::Mem(c) => c.is_closed(),
            #[cfg(feature = "stream")]
            Connection::Stream(c) => c.is_closed(),
            #[cfg(feature = "websocket")]
            Connection::WebSocket(c) => c.is_closed(),
            #[cfg(feature = "testkit")]
            Connection::Scripted(c) => c.is_closed(),
        }
    }

    /// A connected in-process pair.
    #[cfg(feature = "mem")]
    pub fn mem_pair() -> (Self, Self) {
        let (a, b) = mem::MemConnection::pair();
        (Connection::Mem(a), Connection::Mem(b))
    }

    /// Length-prefixed framing over any async byte stream.
    #[cfg(feature = "stream")]
    pub fn stream<S>(stream: S) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync + 'static,
    {
        Connection::Stream(stream::StreamConnection::new(stream))
    }

    #[cfg(feature = "stream")]
    pub fn stream_pair() -> (Self, Self) {
        let (a, b) = stream::StreamConnection::pair();
        (Connection::Stream(a), Connection::Stream(b))
    }

    #[cfg(feature = "websocket")]
    pub fn websocket<S>(ws: tokio_tungstenite::WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        Connection::WebSocket(websocket::WsConnection::new(ws))
    }

    /// A connected scripted pair that records sent frames on both ends.
    #[cfg(feature = "testkit")]
    pub fn scripted_pair() -> (Self, Self) {
        let (a, b) = testkit::ScriptedConnection::pair();
        (Connection::Scripted(a), Connection::Scripted(b))
    }
}

#[cfg(feature = "mem")]
impl From<mem::MemConnection> for Connection {
    fn from(c: mem::MemConnection) -> Self {
        Connection::Mem(c)
    }
}

#[cfg(feature = "stream")]
impl From<stream::StreamConnection> for Connection {
    fn from(c: stream::StreamConnection) -> Self {
        Connection::Stream(c)
    }
}

#[cfg(feature = "websocket")]
impl From<websocket::WsConnection> for Connection {
    fn from(c: websocket::WsConnection) -> Self {
        Connection::WebSocket(c)
    }
}

#[cfg(feature = "testkit")]
impl From<testkit::ScriptedConnection> for Connection {
    fn from(c: testkit::ScriptedConnection) -> Self {
        Connection::Scripted(c)
    }
}

#[cfg(feature = "mem")]
pub mod mem;
#[cfg(feature = "stream")]
pub mod stream;
#[cfg(feature = "testkit")]
pub mod testkit;
#[cfg(feature = "websocket")]
pub mod websocket;
