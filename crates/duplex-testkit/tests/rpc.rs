//! End-to-end conformance suite for the SIMPLEX/1.0 RPC core, driven over
//! scripted connections with hand-routed peers.

use std::sync::Arc;
use std::time::Duration;

use duplex_core::{
    Base64JsonCodec, Channel, Connection, Frame, JsonCodec, Rpc, RpcError, ScriptedConnection,
    Value, codes, json,
};
use duplex_testkit::{handshake_line, init_tracing, peer_pair};

fn json_rpc() -> Rpc {
    init_tracing();
    Rpc::new(JsonCodec)
}

async fn echo(ch: Arc<Channel>) -> Result<(), RpcError> {
    let (payload, _more) = ch.recv().await?;
    ch.send(payload, false).await
}

#[tokio::test]
async fn handshake_sends_protocol_line() {
    let conn = ScriptedConnection::new();
    conn.push_inbound("+OK");
    let rpc = json_rpc();
    let _peer = rpc.handshake_detached(conn.clone().into()).await.unwrap();
    assert_eq!(conn.sent(), vec![Frame::text("SIMPLEX/1.0;json")]);
}

#[tokio::test]
async fn accept_replies_ok() {
    let conn = ScriptedConnection::new();
    conn.push_inbound(handshake_line("json"));
    let rpc = json_rpc();
    let _peer = rpc.accept_detached(conn.clone().into()).await.unwrap();
    assert_eq!(conn.sent(), vec![Frame::text("+OK")]);
}

#[tokio::test]
async fn rejected_handshake_closes_the_connection() {
    let conn = ScriptedConnection::new();
    conn.push_inbound("-ERR go away");
    let rpc = json_rpc();
    let connection: Connection = conn.into();
    let err = rpc
        .handshake_detached(connection.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Handshake(_)));
    assert!(connection.is_closed());
}

#[tokio::test]
async fn echo_handler_replies_after_accept() {
    let rpc = json_rpc();
    rpc.register("echo", echo);

    let conn = ScriptedConnection::new();
    conn.push_inbound(handshake_line("json"));
    let peer = rpc.accept_detached(conn.clone().into()).await.unwrap();

    conn.push_inbound(r#"{"type":"req","method":"echo","id":1,"payload":{"foo":"bar"}}"#);
    peer.route(1).await.unwrap();
    conn.wait_for_sent(2).await;

    let sent = conn.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], Frame::text("+OK"));
    let reply: Value = serde_json::from_str(sent[1].as_text().unwrap()).unwrap();
    assert_eq!(reply, json!({"type": "rep", "id": 1, "payload": {"foo": "bar"}}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_calls_on_paired_peers() {
    let rpc = json_rpc();
    rpc.register("echo-tag", |ch: Arc<Channel>| async move {
        let (mut obj, _more) = ch.recv().await?;
        obj["tag"] = json!(true);
        ch.send(obj, false).await
    });
    let (peer1, peer2, _conn1, _conn2) = peer_pair(&rpc).await.unwrap();

    let (reply1, reply2, route1, route2) = tokio::join!(
        peer1.call("echo-tag", json!({"from": "peer1"})),
        peer2.call("echo-tag", json!({"from": "peer2"})),
        peer1.route(2),
        peer2.route(2),
    );
    route1.unwrap();
    route2.unwrap();
    assert_eq!(reply1.unwrap(), json!({"from": "peer1", "tag": true}));
    assert_eq!(reply2.unwrap(), json!({"from": "peer2", "tag": true}));

    peer1.close().await;
    peer2.close().await;
}

#[tokio::test]
async fn streaming_replies_arrive_in_order() {
    let rpc = json_rpc();
    rpc.register("count", |ch: Arc<Channel>| async move {
        let (count, _more) = ch.recv().await?;
        let count = count.as_i64().unwrap_or(0);
        for n in 1..=count {
            ch.send(json!({"num": n}), n != count).await?;
        }
        Ok(())
    });
    let (client, server, _conn1, _conn2) = peer_pair(&rpc).await.unwrap();

    let ch = client.open("count");
    ch.send(json!(5), false).await.unwrap();
    server.route(1).await.unwrap();

    let collect = async {
        let mut nums = Vec::new();
        loop {
            let (reply, more) = ch.recv().await.unwrap();
            nums.push(reply["num"].as_i64().unwrap());
            if !more {
                break;
            }
        }
        nums
    };
    let (nums, route) = tokio::join!(collect, client.route(5));
    route.unwrap();
    assert_eq!(nums, vec![1, 2, 3, 4, 5]);
    assert_eq!(nums.iter().sum::<i64>(), 15);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn streaming_requests_are_summed() {
    let rpc = json_rpc();
    rpc.register("adder", |ch: Arc<Channel>| async move {
        let mut total = 0i64;
        let mut more = true;
        while more {
            let (value, m) = ch.recv().await?;
            total += value.as_i64().unwrap_or(0);
            more = m;
        }
        ch.send(json!(total), false).await
    });
    let (client, server, _conn1, _conn2) = peer_pair(&rpc).await.unwrap();

    let ch = client.open("adder");
    let feed = async {
        for n in 1..=5 {
            ch.send(json!(n), n != 5).await.unwrap();
        }
        ch.recv().await.unwrap()
    };
    let ((total, more), server_route, client_route) =
        tokio::join!(feed, server.route(5), client.route(1));
    server_route.unwrap();
    client_route.unwrap();
    assert_eq!(total, json!(15));
    assert!(!more);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn ext_metadata_rides_along_on_replies() {
    let rpc = json_rpc();
    rpc.register("echo", echo);
    let (client, server, _client_conn, server_conn) = peer_pair(&rpc).await.unwrap();

    let args = json!({"foo": "bar"});
    let ext = json!({"hidden": "metadata"});
    let ch = client.open("echo");
    ch.set_ext(Some(ext.clone()));
    ch.send(args.clone(), false).await.unwrap();
    server.route(1).await.unwrap();
    client.route(1).await.unwrap();

    let (reply, _more) = ch.recv().await.unwrap();
    assert_eq!(reply, args);

    // the reply frame the server put on the wire carries the same ext
    let sent = server_conn.sent();
    let msg: Value = serde_json::from_str(sent[1].as_text().unwrap()).unwrap();
    assert_eq!(msg["ext"], ext);

    client.close().await;
    server.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn callback_methods_cross_the_wire() {
    let rpc = json_rpc();
    rpc.register_fn("callback", |args, ch| async move {
        let name = args[0].as_str().unwrap().to_owned();
        let arg = args[1].clone();
        ch.call(&name, arg).await
    });
    let upper = rpc.callback_fn(|args, _ch| async move {
        Ok(json!(args.as_str().unwrap().to_uppercase()))
    });
    let (client, server, _conn1, _conn2) = peer_pair(&rpc).await.unwrap();

    let (result, server_route, client_route) = tokio::join!(
        client.call("callback", json!([upper, "hello"])),
        server.route(2),
        client.route(2),
    );
    server_route.unwrap();
    client_route.unwrap();
    assert_eq!(result.unwrap(), json!("HELLO"));

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn custom_codec_end_to_end() {
    init_tracing();
    let rpc = Rpc::new(Base64JsonCodec);
    rpc.register("echo", echo);
    let (client, server, client_conn, _server_conn) = peer_pair(&rpc).await.unwrap();

    let (result, server_route, client_route) = tokio::join!(
        client.call("echo", json!({"foo": "bar"})),
        server.route(1),
        client.route(1),
    );
    server_route.unwrap();
    client_route.unwrap();
    assert_eq!(result.unwrap(), json!({"foo": "bar"}));

    // the handshake line is plain text, the call frame is base64
    let sent = client_conn.sent();
    assert_eq!(sent[0], Frame::text("SIMPLEX/1.0;b64json"));
    assert!(!sent[1].as_text().unwrap().starts_with('{'));

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn error_replies_surface_to_the_caller() {
    let rpc = json_rpc();
    rpc.register("fail", |ch: Arc<Channel>| async move {
        let (_args, _more) = ch.recv().await?;
        ch.send_err(-32000, "no dice", Some(json!({"attempt": 1})))
            .await
    });
    let (client, server, _conn1, _conn2) = peer_pair(&rpc).await.unwrap();

    let (result, server_route, client_route) = tokio::join!(
        client.call("fail", json!(null)),
        server.route(1),
        client.route(1),
    );
    server_route.unwrap();
    client_route.unwrap();

    let err = result.unwrap_err();
    let info = err.remote().expect("remote error");
    assert_eq!(info.code, -32000);
    assert_eq!(info.message, "no dice");
    assert_eq!(info.data, Some(json!({"attempt": 1})));
    assert_eq!(client.pending_replies(), 0);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn unknown_method_gets_an_error_frame() {
    let rpc = json_rpc();
    let (client, server, _conn1, server_conn) = peer_pair(&rpc).await.unwrap();

    let (result, server_route, client_route) = tokio::join!(
        client.call("nonesuch", json!(1)),
        server.route(1),
        client.route(1),
    );
    server_route.unwrap();
    client_route.unwrap();

    let info = result.unwrap_err().remote().cloned().expect("remote error");
    assert_eq!(info.code, codes::METHOD_MISSING);
    assert_eq!(info.message, "method missing");

    let sent = server_conn.sent();
    let frame: Value = serde_json::from_str(sent[1].as_text().unwrap()).unwrap();
    assert_eq!(
        frame,
        json!({"type": "rep", "id": 1, "error": {"code": -32601, "message": "method missing"}})
    );

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn send_err_is_rejected_on_request_channels() {
    let rpc = json_rpc();
    let (client, _server, _conn1, _conn2) = peer_pair(&rpc).await.unwrap();
    let ch = client.open("anything");
    assert!(matches!(
        ch.send_err(1, "nope", None).await,
        Err(RpcError::NotReplyChannel)
    ));
}

#[tokio::test]
async fn detached_call_reply_is_cleared_lazily() {
    let rpc = json_rpc();
    rpc.register("echo", echo);
    let (client, server, _conn1, _conn2) = peer_pair(&rpc).await.unwrap();

    let ch = client.call_detached("echo", json!("fire and forget")).await.unwrap();
    assert_eq!(client.pending_replies(), 1);
    drop(ch);

    server.route(1).await.unwrap();
    client.route(1).await.unwrap();
    assert_eq!(client.pending_replies(), 0);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn recv_timeout_elapses_on_silent_channels() {
    let rpc = json_rpc();
    let (client, _server, _conn1, _conn2) = peer_pair(&rpc).await.unwrap();
    let ch = client.open("never-answered");
    assert!(matches!(
        ch.recv_timeout(Duration::from_millis(20)).await,
        Err(RpcError::Timeout)
    ));
}
