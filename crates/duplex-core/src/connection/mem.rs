//! In-process paired connections over bounded queues.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};

use crate::error::ConnectionError;
use crate::frame::Frame;

use super::ConnectionBackend;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct MemConnection {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    /// Outbound sender into the partner's inbox. Dropped on close so the
    /// partner's `recv` observes closure once its buffer drains.
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
    rx: AsyncMutex<mpsc::Receiver<Frame>>,
    closed: watch::Sender<bool>,
}

impl MemConnection {
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);
        (Self::new(tx_b, rx_a), Self::new(tx_a, rx_b))
    }

    fn new(tx: mpsc::Sender<Frame>, rx: mpsc::Receiver<Frame>) -> Self {
        Self {
            inner: Arc::new(MemInner {
                tx: Mutex::new(Some(tx)),
                rx: AsyncMutex::new(rx),
                closed: watch::Sender::new(false),
            }),
        }
    }
}

impl ConnectionBackend for MemConnection {
    async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        let tx = self.inner.tx.lock().clone();
        match tx {
            Some(tx) => tx.send(frame).await.map_err(|_| ConnectionError::Closed),
            None => Err(ConnectionError::Closed),
        }
    }

    async fn recv(&self) -> Result<Frame, ConnectionError> {
        let mut closed = self.inner.closed.subscribe();
        if *closed.borrow() {
            return Err(ConnectionError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        tokio::select! {
            // drain buffered frames before reporting closure
            biased;
            frame = rx.recv() => frame.ok_or(ConnectionError::Closed),
            _ = closed.wait_for(|closed| *closed) => Err(ConnectionError::Closed),
        }
    }

    fn close(&self) {
        self.inner.closed.send_replace(true);
        self.inner.tx.lock().take();
    }

    fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }
}
