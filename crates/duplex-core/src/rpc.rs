//! The RPC factory: codec, method handler table, handshake and accept.
//!
//! An `Rpc` is cheap to clone and may back any number of peers; both sides
//! of a connection are fully symmetric once the handshake completes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::channel::Channel;
use crate::codec::{Codec, CodecRegistry};
use crate::connection::Connection;
use crate::error::{CodecError, RpcError};
use crate::frame::Frame;
use crate::peer::Peer;
use crate::protocol::{HANDSHAKE_ACCEPT, handshake_line, parse_handshake_line};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), RpcError>> + Send + 'static>>;

/// A registered method implementation, invoked by the router with the
/// reply-role channel of each inbound call. Implemented for free by any
/// `Fn(Arc<Channel>) -> impl Future<Output = Result<(), RpcError>>`.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, ch: Arc<Channel>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Arc<Channel>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
{
    fn handle(&self, ch: Arc<Channel>) -> HandlerFuture {
        Box::pin(self(ch))
    }
}

#[derive(Clone)]
pub struct Rpc {
    inner: Arc<RpcInner>,
}

struct RpcInner {
    codec: Arc<dyn Codec>,
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl std::fmt::Debug for Rpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rpc")
            .field("codec", &self.inner.codec.name())
            .field("methods", &self.inner.handlers.read().len())
            .finish()
    }
}

impl Rpc {
    pub fn new(codec: impl Codec) -> Self {
        Self::with_codec(Arc::new(codec))
    }

    pub fn with_codec(codec: Arc<dyn Codec>) -> Self {
        Self {
            inner: Arc::new(RpcInner {
                codec,
                handlers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Build an RPC speaking the codec registered under `name`.
    pub fn from_registry(registry: &CodecRegistry, name: &str) -> Result<Self, CodecError> {
        registry
            .get(name)
            .map(Self::with_codec)
            .ok_or_else(|| CodecError::Unknown(name.to_owned()))
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.inner.codec
    }

    pub fn register(&self, method: impl Into<String>, handler: impl Handler) {
        self.inner
            .handlers
            .write()
            .insert(method.into(), Arc::new(handler));
    }

    pub fn unregister(&self, method: &str) {
        self.inner.handlers.write().remove(method);
    }

    pub(crate) fn handler(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.inner.handlers.read().get(method).cloned()
    }

    /// Register a plain request/reply function: the wrapper receives the
    /// first payload, invokes `func(args, ch)` and sends its return value
    /// as the single reply.
    pub fn register_fn<F, Fut>(&self, method: impl Into<String>, func: F)
    where
        F: Fn(Value, Arc<Channel>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let func = Arc::new(func);
        self.register(method, move |ch: Arc<Channel>| {
            let func = Arc::clone(&func);
            async move {
                let (args, _more) = ch.recv().await?;
                let ret = func(args, Arc::clone(&ch)).await?;
                ch.send(ret, false).await
            }
        });
    }

    /// Register `func` under a fresh `_callback.<uuid>` name and return
    /// that name, so callable references can be passed across the
    /// connection as method names.
    pub fn callback_fn<F, Fut>(&self, func: F) -> String
    where
        F: Fn(Value, Arc<Channel>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let name = format!("_callback.{}", Uuid::new_v4());
        self.register_fn(name.clone(), func);
        name
    }

    /// Client side of the SIMPLEX handshake; returns a routing peer.
    pub async fn handshake(&self, conn: Connection) -> Result<Peer, RpcError> {
        let peer = self.handshake_detached(conn).await?;
        peer.start_routing().await;
        Ok(peer)
    }

    /// Client handshake without starting the router, for hand-driven
    /// peers and tests.
    pub async fn handshake_detached(&self, conn: Connection) -> Result<Peer, RpcError> {
        let peer = Peer::new(self.clone(), conn);
        peer.conn()
            .send(Frame::Text(handshake_line(self.inner.codec.name())))
            .await?;
        let resp = peer.conn().recv().await?;
        match resp.as_text() {
            Some(text) if text.starts_with('+') => Ok(peer),
            Some(text) => {
                peer.conn().close();
                Err(RpcError::Handshake(format!("server rejected: {text}")))
            }
            None => {
                peer.conn().close();
                Err(RpcError::Handshake("non-text handshake response".into()))
            }
        }
    }

    /// Server side of the SIMPLEX handshake; returns a routing peer.
    pub async fn accept(&self, conn: Connection) -> Result<Peer, RpcError> {
        let peer = self.accept_detached(conn).await?;
        peer.start_routing().await;
        Ok(peer)
    }

    /// Server handshake without starting the router.
    ///
    /// The client's line must name this RPC's codec; on mismatch the
    /// server answers `-ERR <reason>` and closes.
    pub async fn accept_detached(&self, conn: Connection) -> Result<Peer, RpcError> {
        let peer = Peer::new(self.clone(), conn);
        let frame = peer.conn().recv().await?;
        let reason = match frame.as_text() {
            Some(line) => match parse_handshake_line(line) {
                Some(codec) if codec == self.inner.codec.name() => {
                    peer.conn()
                        .send(Frame::Text(HANDSHAKE_ACCEPT.into()))
                        .await?;
                    return Ok(peer);
                }
                Some(codec) => {
                    format!("incompatible codec {codec:?}, this end speaks {:?}", self.inner.codec.name())
                }
                None => format!("malformed handshake line {line:?}"),
            },
            None => "binary handshake frame".to_owned(),
        };
        let _ = peer.conn().send(Frame::Text(format!("-ERR {reason}"))).await;
        peer.conn().close();
        Err(RpcError::Handshake(reason))
    }
}
