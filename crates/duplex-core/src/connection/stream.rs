//! Length-prefixed framing over any async byte stream.
//!
//! Wire layout per frame: a 4-byte big-endian length, one tag byte (text
//! or binary), then the frame body. The length covers the tag and body,
//! so the smallest legal frame is a lone tag byte with length 1.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::ConnectionError;
use crate::frame::Frame;

use super::ConnectionBackend;

const LEN_PREFIX: usize = 4;

/// Refuse frames larger than this (tag byte included).
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const TAG_TEXT: u8 = 0;
const TAG_BINARY: u8 = 1;

/// Read one length prefix. `None` means the stream ended cleanly on a
/// frame boundary; ending inside the prefix is a framing error.
async fn read_len_prefix<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<usize>, ConnectionError> {
    let mut prefix = [0u8; LEN_PREFIX];
    if reader.read(&mut prefix[..1]).await? == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut prefix[1..])
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                ConnectionError::Frame("stream ended inside a length prefix".into())
            }
            _ => ConnectionError::Io(e),
        })?;
    Ok(Some(u32::from_be_bytes(prefix) as usize))
}

#[derive(Clone)]
pub struct StreamConnection {
    inner: Arc<StreamInner>,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection").finish_non_exhaustive()
    }
}

struct StreamInner {
    reader: AsyncMutex<Box<dyn AsyncRead + Unpin + Send + Sync>>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send + Sync>>,
    closed: AtomicBool,
}

impl StreamConnection {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(reader, writer)
    }

    /// Build from separate read and write halves, such as stdio or a split
    /// socket.
    pub fn from_split<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + Sync + 'static,
        W: AsyncWrite + Unpin + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(Box::new(reader)),
                writer: AsyncMutex::new(Box::new(writer)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        (Self::new(a), Self::new(b))
    }

    fn is_closed_inner(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl ConnectionBackend for StreamConnection {
    async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        if self.is_closed_inner() {
            return Err(ConnectionError::Closed);
        }

        let (tag, body): (u8, &[u8]) = match &frame {
            Frame::Text(s) => (TAG_TEXT, s.as_bytes()),
            Frame::Binary(b) => (TAG_BINARY, b),
        };

        let frame_len = body.len() + 1;
        if frame_len > MAX_FRAME_LEN {
            return Err(ConnectionError::Frame(format!(
                "frame of {frame_len} bytes exceeds limit of {MAX_FRAME_LEN}"
            )));
        }

        // One writer-lock scope per frame keeps frames atomic on the wire.
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&(frame_len as u32).to_be_bytes()).await?;
        writer.write_all(&[tag]).await?;
        if !body.is_empty() {
            writer.write_all(body).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, ConnectionError> {
        if self.is_closed_inner() {
            return Err(ConnectionError::Closed);
        }

        let mut reader = self.inner.reader.lock().await;

        let frame_len = match read_len_prefix(&mut *reader).await? {
            Some(len) => len,
            None => return Err(ConnectionError::Closed),
        };

        if frame_len == 0 {
            return Err(ConnectionError::Frame("zero-length frame".into()));
        }
        if frame_len > MAX_FRAME_LEN {
            return Err(ConnectionError::Frame(format!(
                "frame of {frame_len} bytes exceeds limit of {MAX_FRAME_LEN}"
            )));
        }

        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag).await?;

        let mut body = vec![0u8; frame_len - 1];
        if !body.is_empty() {
            reader.read_exact(&mut body).await?;
        }

        match tag[0] {
            TAG_TEXT => String::from_utf8(body)
                .map(Frame::Text)
                .map_err(|_| ConnectionError::Frame("text frame is not valid utf-8".into())),
            TAG_BINARY => Ok(Frame::Binary(Bytes::from(body))),
            other => Err(ConnectionError::Frame(format!("unknown frame tag {other}"))),
        }
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }
}
