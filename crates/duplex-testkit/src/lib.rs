#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

use duplex_core::{Peer, Rpc, RpcError};

pub use duplex_core::{Connection, Frame, ScriptedConnection, handshake_line};

/// Two scripted connections wired back to back; sends on one end feed the
/// other's inbox, and both record what they sent.
pub fn connection_pair() -> (ScriptedConnection, ScriptedConnection) {
    ScriptedConnection::pair()
}

/// Handshake two peers of the same `Rpc` over a scripted pair. Neither
/// peer routes; drive them with `Peer::route`.
///
/// Returns `(client, server)` along with the raw connections for frame
/// inspection.
pub async fn peer_pair(
    rpc: &Rpc,
) -> Result<(Peer, Peer, ScriptedConnection, ScriptedConnection), RpcError> {
    let (client_conn, server_conn) = connection_pair();
    let (client, server) = tokio::join!(
        rpc.handshake_detached(client_conn.clone().into()),
        rpc.accept_detached(server_conn.clone().into()),
    );
    Ok((client?, server?, client_conn, server_conn))
}

/// Initialize a `tracing` subscriber honoring `RUST_LOG`, once per
/// process. Safe to call from every test.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}
