use std::borrow::Cow;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};
use crate::level::LogLevel;

/// Kind byte for log messages, the only kind the engine sends today.
pub const KIND_LOG: u8 = 0;

/// Chunk header: kind (1) + level (1).
pub const CHUNK_HEADER_SIZE: usize = 2;

/// Length prefix in front of a length-delimited message.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum length-delimited payload: 1 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Message types known on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Log,
}

impl TryFrom<u8> for MessageKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            KIND_LOG => Ok(MessageKind::Log),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Log => KIND_LOG,
        }
    }
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Log { level: LogLevel, text: String },
}

impl Frame {
    pub fn log(level: LogLevel, text: impl Into<String>) -> Self {
        Frame::Log {
            level,
            text: text.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Frame::Log { .. } => MessageKind::Log,
        }
    }
}

/// How message boundaries are found in the byte stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// Each read is one message; no length on the wire.
    #[default]
    Chunked,
    /// `[len:u32 LE][kind][level][text]`, `len` covering kind, level and text.
    LengthPrefixed,
}

impl Framing {
    /// Encode one log message in this discipline.
    pub fn encode_log(self, level: LogLevel, text: &str, dst: &mut BytesMut) -> Result<()> {
        match self {
            Framing::Chunked => {
                encode_chunk(level, text, dst);
                Ok(())
            }
            Framing::LengthPrefixed => encode_frame(level, text, dst),
        }
    }
}

/// Configuration for decoding.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Framing discipline. Default: chunked.
    pub framing: Framing,
    /// Maximum length-delimited payload. Default: 1 MiB.
    pub max_payload_size: usize,
    /// Report invalid UTF-8 as an error instead of substituting U+FFFD.
    pub strict_utf8: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Chunked,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            strict_utf8: false,
        }
    }
}

/// Encode a log message as a bare chunk.
///
/// ```text
/// ┌──────────┬───────────┬──────────────────────┐
/// │ Kind (1) │ Level (1) │ UTF-8 text (rest)    │
/// └──────────┴───────────┴──────────────────────┘
/// ```
pub fn encode_chunk(level: LogLevel, text: &str, dst: &mut BytesMut) {
    dst.reserve(CHUNK_HEADER_SIZE + text.len());
    dst.put_u8(KIND_LOG);
    dst.put_u8(level.as_u8());
    dst.put_slice(text.as_bytes());
}

/// Encode a log message with a length prefix.
pub fn encode_frame(level: LogLevel, text: &str, dst: &mut BytesMut) -> Result<()> {
    let len = CHUNK_HEADER_SIZE + text.len();
    if len > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: u32::MAX as usize,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + len);
    dst.put_u32_le(len as u32);
    encode_chunk(level, text, dst);
    Ok(())
}

/// Decode exactly one read's worth of bytes as a single message.
///
/// An empty chunk yields `Ok(None)`.
pub fn decode_chunk(chunk: &[u8], strict_utf8: bool) -> Result<Option<Frame>> {
    let Some(&kind) = chunk.first() else {
        return Ok(None);
    };
    decode_body(kind, &chunk[1..], strict_utf8).map(Some)
}

/// Decode one length-delimited message from the front of `src`.
///
/// Returns `Ok(None)` while the buffer holds an incomplete message. A
/// complete message is consumed even when it fails to decode, so the stream
/// stays in sync; only `PayloadTooLarge` leaves the buffer untouched.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Frame>> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
    let len = u32::from_le_bytes(prefix) as usize;

    if len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    if src.len() < LENGTH_PREFIX_SIZE + len {
        return Ok(None);
    }

    src.advance(LENGTH_PREFIX_SIZE);
    let body = src.split_to(len);
    let Some(&kind) = body.first() else {
        return Err(FrameError::Truncated);
    };
    decode_body(kind, &body[1..], config.strict_utf8).map(Some)
}

fn decode_body(kind: u8, rest: &[u8], strict_utf8: bool) -> Result<Frame> {
    match MessageKind::try_from(kind)? {
        MessageKind::Log => {
            let Some((&level, text)) = rest.split_first() else {
                return Err(FrameError::Truncated);
            };
            let text = decode_text(text, strict_utf8)?;
            Ok(Frame::Log {
                level: LogLevel::from_u8(level),
                text,
            })
        }
    }
}

fn decode_text(bytes: &[u8], strict_utf8: bool) -> Result<String> {
    if strict_utf8 {
        return Ok(std::str::from_utf8(bytes)?.to_owned());
    }
    Ok(match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(text) => text.to_owned(),
        Cow::Owned(text) => {
            tracing::debug!(len = bytes.len(), "replaced invalid UTF-8 in log text");
            text
        }
    })
}
