/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The kind byte names a message type this side does not understand.
    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    /// The text region is not valid UTF-8 (strict mode only).
    #[error("invalid UTF-8 in log text: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// The message is too short to hold its own header.
    #[error("truncated message header")]
    Truncated,

    /// The declared payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

impl FrameError {
    /// Whether the stream can carry on after this error.
    ///
    /// Only an oversized length prefix is fatal: the reader can no longer
    /// tell where the next frame starts.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FrameError::PayloadTooLarge { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
