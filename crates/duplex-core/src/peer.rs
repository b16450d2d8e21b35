//! One endpoint of a connection: channel tables, id counter and the frame
//! router.
//!
//! The router is the only task that reads the connection. Inbound `req`
//! frames consult the request table, inbound `rep` frames the reply table;
//! the two id spaces are independent, so both peers may use the same ids
//! for opposite-direction calls without ambiguity.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinSet;

use crate::channel::{Channel, InboxItem, Role};
use crate::connection::Connection;
use crate::error::{ConnectionError, RpcError};
use crate::protocol::{ErrorInfo, Message, MsgType, codes};
use crate::rpc::Rpc;

pub(crate) struct PeerCore {
    rpc: Rpc,
    conn: Connection,
    /// Outbound call ids, pre-incremented; the router never touches this.
    counter: AtomicU64,
    /// Inbound streaming requests, id to channel.
    request_channels: Mutex<HashMap<u64, Arc<Channel>>>,
    /// Outbound calls awaiting replies, id to channel.
    reply_channels: Mutex<HashMap<u64, Arc<Channel>>>,
    routing: AtomicBool,
    closed: watch::Sender<bool>,
    /// Router plus one task per in-flight handler invocation.
    tasks: AsyncMutex<JoinSet<()>>,
}

impl PeerCore {
    pub(crate) async fn send_message(&self, msg: &Message) -> Result<(), RpcError> {
        let frame = self.rpc.codec().encode(msg)?;
        self.conn.send(frame).await?;
        Ok(())
    }

    pub(crate) fn open(self: &Arc<Self>, method: &str, ext: Option<Value>) -> Arc<Channel> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let ch = Channel::new(self.clone(), Role::Request, method.to_owned(), Some(id), ext);
        self.reply_channels.lock().insert(id, ch.clone());
        ch
    }

    pub(crate) fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub(crate) async fn close(&self) {
        self.routing.store(false, Ordering::Release);
        self.conn.close();
        self.closed.send_replace(true);
        self.request_channels.lock().clear();
        self.reply_channels.lock().clear();
        let mut tasks = self.tasks.lock().await;
        tasks.shutdown().await;
    }

    /// Read and route one frame. Empty frames are ignored but still count
    /// as one iteration of a bounded route.
    async fn route_next(self: &Arc<Self>) -> Result<(), RpcError> {
        let frame = self.conn.recv().await?;
        if frame.is_empty() {
            return Ok(());
        }
        let msg = self.rpc.codec().decode(&frame)?;
        match msg.kind {
            MsgType::Req => self.route_request(msg).await,
            MsgType::Rep => self.route_reply(msg),
        }
    }

    async fn route_request(self: &Arc<Self>, msg: Message) -> Result<(), RpcError> {
        // a follow-up frame of a known request stream?
        let existing = match msg.id {
            Some(id) => {
                let mut requests = self.request_channels.lock();
                let ch = requests.get(&id).cloned();
                if ch.is_some() && !msg.more {
                    requests.remove(&id);
                }
                ch
            }
            None => None,
        };

        let ch = match existing {
            Some(ch) => ch,
            None => {
                let method = msg
                    .method
                    .clone()
                    .ok_or(RpcError::BadMessage("request without method"))?;

                let Some(handler) = self.rpc.handler(&method) else {
                    match msg.id {
                        Some(id) => {
                            tracing::warn!(method = %method, id, "request for unregistered method");
                            let error = ErrorInfo::new(codes::METHOD_MISSING, "method missing");
                            self.send_message(&Message::error_reply(id, error, None))
                                .await?;
                        }
                        None => {
                            tracing::warn!(method = %method, "dropping id-less request for unregistered method");
                        }
                    }
                    return Ok(());
                };

                let ch = Channel::new(self.clone(), Role::Reply, method.clone(), msg.id, None);
                // register before spawning, so the next frame with this id
                // lands in the same channel regardless of handler progress
                if msg.more {
                    if let Some(id) = msg.id {
                        self.request_channels.lock().insert(id, ch.clone());
                    }
                }
                let fut = handler.handle(ch.clone());
                self.tasks.lock().await.spawn(async move {
                    if let Err(error) = fut.await {
                        tracing::warn!(method = %method, %error, "handler failed");
                    }
                });
                ch
            }
        };

        if let Some(ext) = msg.ext {
            ch.set_ext(Some(ext));
        }
        ch.push(InboxItem::Payload {
            payload: msg.payload.unwrap_or(Value::Null),
            more: msg.more,
        });
        Ok(())
    }

    fn route_reply(&self, msg: Message) -> Result<(), RpcError> {
        let id = msg.id.ok_or(RpcError::BadMessage("reply without id"))?;
        let terminal = msg.error.is_some() || !msg.more;
        let ch = {
            let mut replies = self.reply_channels.lock();
            if terminal {
                replies.remove(&id)
            } else {
                replies.get(&id).cloned()
            }
        };
        let Some(ch) = ch else {
            // e.g. a late reply to a call the caller abandoned
            tracing::warn!(id, "dropping reply for unknown channel");
            return Ok(());
        };
        match msg.error {
            Some(error) => ch.push(InboxItem::Error(error)),
            None => ch.push(InboxItem::Payload {
                payload: msg.payload.unwrap_or(Value::Null),
                more: msg.more,
            }),
        }
        Ok(())
    }
}

/// One end of a connected pair. Cheap to clone; all clones share the same
/// underlying state.
#[derive(Clone)]
pub struct Peer {
    core: Arc<PeerCore>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("pending_requests", &self.pending_requests())
            .field("pending_replies", &self.pending_replies())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Peer {
    pub(crate) fn new(rpc: Rpc, conn: Connection) -> Self {
        Self {
            core: Arc::new(PeerCore {
                rpc,
                conn,
                counter: AtomicU64::new(0),
                request_channels: Mutex::new(HashMap::new()),
                reply_channels: Mutex::new(HashMap::new()),
                routing: AtomicBool::new(true),
                closed: watch::Sender::new(false),
                tasks: AsyncMutex::new(JoinSet::new()),
            }),
        }
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.core.conn
    }

    /// Open a request-role channel for `method`. Ids are peer-local,
    /// strictly increasing, and the channel is registered to receive
    /// replies before this returns.
    pub fn open(&self, method: &str) -> Arc<Channel> {
        self.core.open(method, None)
    }

    /// Open a channel, send `args` as the sole request and await the
    /// single reply.
    pub async fn call(&self, method: &str, args: Value) -> Result<Value, RpcError> {
        let ch = self.open(method);
        ch.send(args, false).await?;
        let (ret, _more) = ch.recv().await?;
        Ok(ret)
    }

    /// Like [`Peer::call`] but without awaiting the reply.
    pub async fn call_detached(&self, method: &str, args: Value) -> Result<Arc<Channel>, RpcError> {
        let ch = self.open(method);
        ch.send(args, false).await?;
        Ok(ch)
    }

    /// Spawn the router task. Exactly one router reads the connection;
    /// handshake and accept do this for you unless asked not to.
    pub async fn start_routing(&self) {
        let core = self.core.clone();
        self.core.tasks.lock().await.spawn(async move {
            while core.routing.load(Ordering::Acquire) {
                match core.route_next().await {
                    Ok(()) => {}
                    Err(RpcError::Connection(ConnectionError::Closed)) => {
                        tracing::debug!("connection closed, router exiting");
                        break;
                    }
                    Err(error) => {
                        // decode and protocol errors are fatal to the peer
                        tracing::error!(%error, "router failed, tearing down connection");
                        core.conn.close();
                        break;
                    }
                }
            }
            // unblock channel receivers once no more frames can arrive
            core.closed.send_replace(true);
        });
    }

    /// Route a bounded number of frames on the caller's task, for tests
    /// and hand-driven peers. Must not run concurrently with
    /// [`Peer::start_routing`].
    pub async fn route(&self, loops: usize) -> Result<(), RpcError> {
        for _ in 0..loops {
            if !self.core.routing.load(Ordering::Acquire) {
                break;
            }
            self.core.route_next().await?;
        }
        Ok(())
    }

    /// Tear down: stop routing, close the transport, drop channel
    /// registrations and cancel outstanding tasks. Idempotent; unblocks
    /// anything awaiting the connection or a channel inbox.
    pub async fn close(&self) {
        self.core.close().await;
    }

    pub fn is_closed(&self) -> bool {
        *self.core.closed.borrow()
    }

    /// Number of inbound request streams currently registered.
    pub fn pending_requests(&self) -> usize {
        self.core.request_channels.lock().len()
    }

    /// Number of outbound calls currently awaiting replies.
    pub fn pending_replies(&self) -> usize {
        self.core.reply_channels.lock().len()
    }
}
