//! Scripted connections for tests: every sent frame is recorded, inbound
//! frames can be pre-loaded, and two scripted ends can be paired so sends
//! on one side feed the other's inbox.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};

use crate::error::ConnectionError;
use crate::frame::Frame;

use super::ConnectionBackend;

#[derive(Clone, Debug)]
pub struct ScriptedConnection {
    inner: Arc<ScriptedInner>,
}

#[derive(Debug)]
struct ScriptedInner {
    sent: Mutex<Vec<Frame>>,
    sent_count: watch::Sender<usize>,
    /// When paired, sends are forwarded into the partner's inbox.
    partner_tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    inbox_tx: mpsc::UnboundedSender<Frame>,
    inbox_rx: AsyncMutex<mpsc::UnboundedReceiver<Frame>>,
    closed: watch::Sender<bool>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ScriptedInner {
                sent: Mutex::new(Vec::new()),
                sent_count: watch::Sender::new(0),
                partner_tx: Mutex::new(None),
                inbox_tx,
                inbox_rx: AsyncMutex::new(inbox_rx),
                closed: watch::Sender::new(false),
            }),
        }
    }

    /// Two scripted ends wired back to back.
    pub fn pair() -> (Self, Self) {
        let a = Self::new();
        let b = Self::new();
        *a.inner.partner_tx.lock() = Some(b.inner.inbox_tx.clone());
        *b.inner.partner_tx.lock() = Some(a.inner.inbox_tx.clone());
        (a, b)
    }

    /// Queue a frame for the next `recv`.
    pub fn push_inbound(&self, frame: impl Into<Frame>) {
        let _ = self.inner.inbox_tx.send(frame.into());
    }

    /// Everything sent on this end so far, in order.
    pub fn sent(&self) -> Vec<Frame> {
        self.inner.sent.lock().clone()
    }

    /// Wait until at least `n` frames have been sent on this end.
    pub async fn wait_for_sent(&self, n: usize) {
        let mut count = self.inner.sent_count.subscribe();
        count
            .wait_for(|sent| *sent >= n)
            .await
            .expect("sent counter never closes while the connection is alive");
    }
}

impl Default for ScriptedConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBackend for ScriptedConnection {
    async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        if *self.inner.closed.borrow() {
            return Err(ConnectionError::Closed);
        }
        self.inner.sent.lock().push(frame.clone());
        self.inner.sent_count.send_modify(|sent| *sent += 1);
        let partner = self.inner.partner_tx.lock().clone();
        if let Some(partner) = partner {
            let _ = partner.send(frame);
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, ConnectionError> {
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow() {
            return Err(ConnectionError::Closed);
        }
        let mut rx = self.inner.inbox_rx.lock().await;
        tokio::select! {
            // drain queued frames before reporting closure
            biased;
            frame = rx.recv() => frame.ok_or(ConnectionError::Closed),
            _ = closed.wait_for(|closed| *closed) => Err(ConnectionError::Closed),
        }
    }

    fn close(&self) {
        self.inner.closed.send_replace(true);
        self.inner.partner_tx.lock().take();
    }

    fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }
}
