//! Smoke tests for the facade surface: in-memory pairs and real TCP.

use duplex::prelude::*;
use duplex::{Connection, json};

fn echo_rpc() -> Rpc {
    let rpc = Rpc::new(JsonCodec);
    rpc.register_fn("echo", |args, _ch| async move { Ok(args) });
    rpc
}

#[tokio::test]
async fn mem_pair_call() {
    let rpc = echo_rpc();
    let (a, b) = Connection::mem_pair();
    let (client, server) = tokio::join!(rpc.handshake(a), rpc.accept(b));
    let (client, server) = (client.unwrap(), server.unwrap());

    let reply = client.call("echo", json!({"hello": "world"})).await.unwrap();
    assert_eq!(reply, json!({"hello": "world"}));

    client.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_round_trip() {
    let rpc = Rpc::new(JsonCodec);
    rpc.register_fn("add", |args, _ch| async move {
        let a = args[0].as_i64().unwrap_or(0);
        let b = args[1].as_i64().unwrap_or(0);
        Ok(json!(a + b))
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_rpc = rpc.clone();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        // the router outlives this task; it stops when the client hangs up
        let _peer = server_rpc
            .accept(duplex::server::serve_connection(socket))
            .await
            .unwrap();
    });

    let socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    let client = rpc.handshake(Connection::stream(socket)).await.unwrap();
    assert_eq!(client.call("add", json!([2, 3])).await.unwrap(), json!(5));
    assert_eq!(client.call("add", json!([40, 2])).await.unwrap(), json!(42));
    client.close().await;
}

#[tokio::test]
async fn handlers_can_stream_through_the_facade() {
    let rpc = Rpc::new(JsonCodec);
    rpc.register("chunks", |ch: std::sync::Arc<Channel>| async move {
        let (_args, _more) = ch.recv().await?;
        ch.send(json!("a"), true).await?;
        ch.send(json!("b"), false).await
    });
    let (a, b) = Connection::mem_pair();
    let (client, server) = tokio::join!(rpc.handshake(a), rpc.accept(b));
    let (client, server) = (client.unwrap(), server.unwrap());

    let ch = client.open("chunks");
    ch.send(json!(null), false).await.unwrap();
    assert_eq!(ch.recv().await.unwrap(), (json!("a"), true));
    assert_eq!(ch.recv().await.unwrap(), (json!("b"), false));

    client.close().await;
    server.close().await;
}
