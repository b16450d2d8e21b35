#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

// Re-export the core surface
pub use duplex_core::{
    Base64JsonCodec, Channel, Codec, CodecError, CodecRegistry, Connection, ConnectionError,
    ErrorInfo, Frame, HANDSHAKE_ACCEPT, Handler, HandlerFuture, JsonCodec, Message, MsgType,
    PROTOCOL_NAME, PROTOCOL_VERSION, Peer, Role, Rpc, RpcError, Value, codes, handshake_line,
    is_valid_codec_name, json, parse_handshake_line,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use duplex::prelude::*;
/// ```
pub mod prelude {
    pub use duplex_core::{
        Channel, Codec, Connection, Handler, JsonCodec, Peer, Role, Rpc, RpcError,
    };
}

/// Transport backends.
///
/// Each backend is behind a feature flag. Enable the ones you need:
///
/// ```toml
/// [dependencies]
/// duplex = { version = "0.1", features = ["mem", "stream"] }
/// ```
pub mod transport {
    #[cfg(feature = "mem")]
    pub use duplex_core::MemConnection;

    #[cfg(feature = "stream")]
    pub use duplex_core::StreamConnection;

    #[cfg(feature = "testkit")]
    pub use duplex_core::ScriptedConnection;

    #[cfg(feature = "websocket")]
    pub use duplex_core::WsConnection;
}

/// Server helpers for serving an RPC over TCP.
#[cfg(feature = "stream")]
pub mod server {
    use duplex_core::{Connection, Rpc};
    use tokio::net::{TcpStream, ToSocketAddrs};

    /// Wrap an accepted TCP socket in a framed connection, ready for
    /// [`Rpc::accept`].
    pub fn serve_connection(socket: TcpStream) -> Connection {
        Connection::stream(socket)
    }

    /// Accept TCP connections on `addr` and perform the server handshake
    /// on each, leaving the per-connection router running until the peer
    /// disconnects.
    pub async fn run_tcp_server(
        addr: impl ToSocketAddrs,
        rpc: Rpc,
    ) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening");

        loop {
            let (socket, peer_addr) = listener.accept().await?;
            let rpc = rpc.clone();
            tokio::spawn(async move {
                match rpc.accept(serve_connection(socket)).await {
                    Ok(_peer) => tracing::debug!(%peer_addr, "peer connected"),
                    Err(error) => tracing::warn!(%peer_addr, %error, "handshake failed"),
                }
            });
        }
    }
}
