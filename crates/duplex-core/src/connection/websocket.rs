//! WebSocket backend over tokio-tungstenite.
//!
//! Text messages map to text frames and binary messages to binary frames;
//! ping/pong is handled by the library and skipped here. The transport
//! provides framing, so one websocket message is one frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{Stream, StreamExt};
use futures_util::sink::{Sink, SinkExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

use crate::error::ConnectionError;
use crate::frame::Frame;

use super::ConnectionBackend;

type WsSink = Box<dyn Sink<WsMessage, Error = tungstenite::Error> + Send + Unpin>;
type WsSource = Box<dyn Stream<Item = Result<WsMessage, tungstenite::Error>> + Send + Unpin>;

#[derive(Clone)]
pub struct WsConnection {
    inner: Arc<WsInner>,
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection").finish_non_exhaustive()
    }
}

struct WsInner {
    sink: AsyncMutex<WsSink>,
    source: AsyncMutex<WsSource>,
    closed: AtomicBool,
}

impl WsConnection {
    pub fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = ws.split();
        Self {
            inner: Arc::new(WsInner {
                sink: AsyncMutex::new(Box::new(sink)),
                source: AsyncMutex::new(Box::new(source)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Dial a websocket server, e.g. `ws://127.0.0.1:9000/`.
    pub async fn connect(url: &str) -> Result<Self, ConnectionError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(map_ws_err)?;
        Ok(Self::new(ws))
    }

    /// Perform the server side of the websocket upgrade on an accepted
    /// byte stream.
    pub async fn accept<S>(stream: S) -> Result<Self, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(map_ws_err)?;
        Ok(Self::new(ws))
    }

    fn is_closed_inner(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

fn map_ws_err(err: tungstenite::Error) -> ConnectionError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ConnectionError::Closed
        }
        err => ConnectionError::WebSocket(err),
    }
}

impl ConnectionBackend for WsConnection {
    async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        if self.is_closed_inner() {
            return Err(ConnectionError::Closed);
        }

        let msg = match frame {
            Frame::Text(s) => WsMessage::Text(s.into()),
            Frame::Binary(b) => WsMessage::Binary(b),
        };

        let mut sink = self.inner.sink.lock().await;
        sink.send(msg).await.map_err(map_ws_err)
    }

    async fn recv(&self) -> Result<Frame, ConnectionError> {
        loop {
            if self.is_closed_inner() {
                return Err(ConnectionError::Closed);
            }

            let msg = {
                let mut source = self.inner.source.lock().await;
                source.next().await
            };

            match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(Frame::Text(text.as_str().to_owned()));
                }
                Some(Ok(WsMessage::Binary(bytes))) => return Ok(Frame::Binary(bytes)),
                Some(Ok(WsMessage::Close(_))) | None => {
                    self.inner.closed.store(true, Ordering::Release);
                    return Err(ConnectionError::Closed);
                }
                // ping/pong and raw frames carry no payload for us
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(map_ws_err(err)),
            }
        }
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }
}
