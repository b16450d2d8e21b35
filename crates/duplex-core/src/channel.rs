//! One logical call leg multiplexed over a peer's connection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::error::RpcError;
use crate::peer::PeerCore;
use crate::protocol::{ErrorInfo, Message};

/// Which side of the call this channel leg is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created locally by `open`; sends requests, receives replies.
    Request,
    /// Created by the router for an inbound request; receives requests,
    /// sends replies.
    Reply,
}

/// What the router delivers into a channel inbox.
pub(crate) enum InboxItem {
    Payload { payload: Value, more: bool },
    Error(ErrorInfo),
}

/// One logical call leg.
///
/// Channels are handed out as `Arc<Channel>`; all operations take `&self`.
/// The peer keeps a channel registered in its tables while the stream is
/// live and drops the registration when the terminating frame routes, but
/// a held channel stays usable for sending until the peer closes.
pub struct Channel {
    peer: Arc<PeerCore>,
    role: Role,
    method: String,
    id: Option<u64>,
    ext: Mutex<Option<Value>>,
    inbox_tx: mpsc::UnboundedSender<InboxItem>,
    inbox_rx: AsyncMutex<mpsc::UnboundedReceiver<InboxItem>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("role", &self.role)
            .field("method", &self.method)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub(crate) fn new(
        peer: Arc<PeerCore>,
        role: Role,
        method: String,
        id: Option<u64>,
        ext: Option<Value>,
    ) -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            peer,
            role,
            method,
            id,
            ext: Mutex::new(ext),
            inbox_tx,
            inbox_rx: AsyncMutex::new(inbox_rx),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The correlation id, assigned by whichever side opened the call.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Opaque per-frame metadata. Attached to every frame this channel
    /// sends and inherited by sibling channels opened through
    /// [`Channel::open`] and [`Channel::call`].
    pub fn ext(&self) -> Option<Value> {
        self.ext.lock().clone()
    }

    pub fn set_ext(&self, ext: Option<Value>) {
        *self.ext.lock() = ext;
    }

    pub(crate) fn push(&self, item: InboxItem) {
        // the receiver half lives as long as the channel itself
        let _ = self.inbox_tx.send(item);
    }

    /// Send one payload on this channel, framed according to role.
    ///
    /// `more` marks a non-terminal frame of a stream and must be set on
    /// every request frame that is not the last one; follow-up frames for
    /// an id whose first frame was terminal find no registered channel on
    /// the remote side.
    pub async fn send(&self, payload: Value, more: bool) -> Result<(), RpcError> {
        let msg = match self.role {
            Role::Request => {
                Message::request(payload, self.method.clone(), self.id, more, self.ext())
            }
            Role::Reply => {
                let id = self
                    .id
                    .ok_or(RpcError::BadMessage("reply channel has no id"))?;
                Message::reply(id, payload, more, self.ext())
            }
        };
        self.peer.send_message(&msg).await
    }

    /// Send an error reply, terminating the call. Reply-role only.
    pub async fn send_err(
        &self,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Result<(), RpcError> {
        if self.role != Role::Reply {
            return Err(RpcError::NotReplyChannel);
        }
        let id = self
            .id
            .ok_or(RpcError::BadMessage("reply channel has no id"))?;
        let error = ErrorInfo {
            code,
            message: message.into(),
            data,
        };
        self.peer
            .send_message(&Message::error_reply(id, error, self.ext()))
            .await
    }

    /// Receive the next inbound payload and its streaming flag.
    ///
    /// An error reply surfaces as `Err(RpcError::Remote(_))`; a closed
    /// peer as `Err(RpcError::Closed)` once the inbox drains.
    pub async fn recv(&self) -> Result<(Value, bool), RpcError> {
        let mut closed = self.peer.closed_watch();
        let mut rx = self.inbox_rx.lock().await;
        let item = tokio::select! {
            // drain queued frames before reporting closure
            biased;
            item = rx.recv() => item.ok_or(RpcError::Closed)?,
            _ = closed.wait_for(|closed| *closed) => return Err(RpcError::Closed),
        };
        match item {
            InboxItem::Payload { payload, more } => Ok((payload, more)),
            InboxItem::Error(error) => Err(RpcError::Remote(error)),
        }
    }

    /// [`Channel::recv`] with a deadline.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<(Value, bool), RpcError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| RpcError::Timeout)?
    }

    /// Open a sibling channel on the same peer, inheriting `ext`. Nothing
    /// is sent.
    pub fn open(&self, method: &str) -> Arc<Channel> {
        self.peer.open(method, self.ext())
    }

    /// Open a sibling channel, send `args` as the sole request and await
    /// the single reply.
    pub async fn call(&self, method: &str, args: Value) -> Result<Value, RpcError> {
        let ch = self.open(method);
        ch.send(args, false).await?;
        let (ret, _more) = ch.recv().await?;
        Ok(ret)
    }

    /// Like [`Channel::call`] but without awaiting the reply; returns the
    /// new channel so the caller may `recv` later or walk away.
    pub async fn call_detached(&self, method: &str, args: Value) -> Result<Arc<Channel>, RpcError> {
        let ch = self.open(method);
        ch.send(args, false).await?;
        Ok(ch)
    }

    /// Close the owning peer. Idempotent.
    pub async fn close(&self) {
        self.peer.close().await;
    }
}
