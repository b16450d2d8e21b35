//! Codec boundary: named encode/decode pairs and the registry that maps
//! codec identifiers to them.
//!
//! Codecs are deterministic and total on well-formed input and never look
//! inside payloads.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::CodecError;
use crate::frame::Frame;
use crate::protocol::Message;

pub trait Codec: Send + Sync + 'static {
    /// The identifier exchanged during handshake. An ASCII token without
    /// `;` or `/`.
    fn name(&self) -> &'static str;

    fn encode(&self, msg: &Message) -> Result<Frame, CodecError>;

    fn decode(&self, frame: &Frame) -> Result<Message, CodecError>;
}

/// Plain JSON text frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, msg: &Message) -> Result<Frame, CodecError> {
        Ok(Frame::Text(serde_json::to_string(msg)?))
    }

    fn decode(&self, frame: &Frame) -> Result<Message, CodecError> {
        Ok(serde_json::from_slice(frame.as_bytes())?)
    }
}

/// JSON wrapped in base64, for transports that mangle raw JSON text.
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64JsonCodec;

impl Codec for Base64JsonCodec {
    fn name(&self) -> &'static str {
        "b64json"
    }

    fn encode(&self, msg: &Message) -> Result<Frame, CodecError> {
        let json = serde_json::to_vec(msg)?;
        Ok(Frame::Text(BASE64.encode(json)))
    }

    fn decode(&self, frame: &Frame) -> Result<Message, CodecError> {
        let json = BASE64.decode(frame.as_bytes())?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// Codec identifiers are ASCII tokens and must survive embedding in the
/// handshake line, so `;` and `/` are out.
pub fn is_valid_codec_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_graphic() && c != ';' && c != '/')
}

/// Mapping from codec identifier to codec.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Registry with the built-in codecs (`json`, `b64json`).
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry
            .register(Arc::new(JsonCodec))
            .expect("built-in codec name is valid");
        registry
            .register(Arc::new(Base64JsonCodec))
            .expect("built-in codec name is valid");
        registry
    }

    pub fn register(&mut self, codec: Arc<dyn Codec>) -> Result<(), CodecError> {
        let name = codec.name();
        if !is_valid_codec_name(name) {
            return Err(CodecError::InvalidName(name.to_owned()));
        }
        self.codecs.insert(name, codec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Codec>> {
        self.codecs.get(name).cloned()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("codecs", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}
