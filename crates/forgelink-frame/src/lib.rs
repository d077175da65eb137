//! Type-tagged message framing for the engine link.
//!
//! Every message starts with a one-byte kind and, for logs, a one-byte
//! severity, followed by UTF-8 text. Two disciplines carry that header:
//! - [`Framing::Chunked`]: one OS read is one message (what the engine speaks)
//! - [`Framing::LengthPrefixed`]: a 4-byte little-endian length in front
//!
//! [`ReceiveBuffer`] turns raw reads of either kind into complete log lines.

pub mod buffer;
pub mod codec;
pub mod error;
pub mod level;

pub use buffer::ReceiveBuffer;
pub use codec::{
    decode_chunk, decode_frame, encode_chunk, encode_frame, Frame, FrameConfig, Framing,
    MessageKind, CHUNK_HEADER_SIZE, DEFAULT_MAX_PAYLOAD, KIND_LOG, LENGTH_PREFIX_SIZE,
};
pub use error::{FrameError, Result};
pub use level::LogLevel;
