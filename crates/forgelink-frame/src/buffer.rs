use bytes::BytesMut;

use crate::codec::{decode_chunk, decode_frame, Frame, FrameConfig, Framing, KIND_LOG};
use crate::error::Result;
use crate::level::LogLevel;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reassembles log lines from arbitrary read boundaries.
///
/// Each call to [`push`](Self::push) takes one read's worth of bytes and
/// returns every line that became available, in stream order. Text is split
/// on `\n`; empty lines are dropped. A read without a terminator is emitted
/// as-is, so a line never waits on the next read.
#[derive(Debug)]
pub struct ReceiveBuffer {
    bytes: BytesMut,
    text: String,
    config: FrameConfig,
}

impl ReceiveBuffer {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            bytes: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            text: String::new(),
            config,
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Bytes held back waiting for the rest of a length-delimited frame.
    pub fn pending_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Drop all buffered state.
    pub fn reset(&mut self) {
        self.bytes.clear();
        self.text.clear();
    }

    /// Feed one read.
    ///
    /// Decode failures come back in-line as `Err` entries so the caller can
    /// log them and carry on. After an unrecoverable error nothing more is
    /// decoded from this call and the buffer is reset.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Frame>> {
        let mut out = Vec::new();
        match self.config.framing {
            Framing::Chunked => {
                for message in split_coalesced(chunk) {
                    match decode_chunk(message, self.config.strict_utf8) {
                        Ok(Some(Frame::Log { level, text })) => {
                            self.text.push_str(&text);
                            self.drain_lines(level, &mut out);
                        }
                        Ok(None) => {}
                        Err(err) => out.push(Err(err)),
                    }
                }
            }
            Framing::LengthPrefixed => {
                self.bytes.extend_from_slice(chunk);
                loop {
                    match decode_frame(&mut self.bytes, &self.config) {
                        Ok(Some(Frame::Log { level, text })) => {
                            self.text.push_str(&text);
                            self.drain_lines(level, &mut out);
                        }
                        Ok(None) => break,
                        Err(err) if err.is_recoverable() => out.push(Err(err)),
                        Err(err) => {
                            self.reset();
                            out.push(Err(err));
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn drain_lines(&mut self, level: LogLevel, out: &mut Vec<Result<Frame>>) {
        if self.text.contains('\n') {
            for line in self.text.split('\n') {
                let line = line.strip_suffix('\r').unwrap_or(line);
                if !line.is_empty() {
                    out.push(Ok(Frame::log(level, line)));
                }
            }
        } else {
            let line = self.text.strip_suffix('\r').unwrap_or(&self.text);
            if !line.is_empty() {
                out.push(Ok(Frame::log(level, line)));
            }
        }
        self.text.clear();
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

/// Split a chunked read that holds several back-to-back messages.
///
/// A new message is assumed wherever a `\n` is directly followed by a log
/// header: the log kind byte plus any level byte. NUL never shows up in
/// engine log text, so this does not cut real lines.
fn split_coalesced(chunk: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut start = 0usize;
    let mut pos = 0usize;
    let mut done = chunk.is_empty();

    std::iter::from_fn(move || {
        if done {
            return None;
        }
        // Skip the header of the current message before looking for a split.
        pos = pos.max(start + 2);
        while pos + 1 < chunk.len() {
            if chunk[pos - 1] == b'\n' && chunk[pos] == KIND_LOG {
                let message = &chunk[start..pos];
                start = pos;
                pos += 2;
                return Some(message);
            }
            pos += 1;
        }
        done = true;
        Some(&chunk[start..])
    })
}
