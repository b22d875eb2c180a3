//! Incremental parser for the streamed completion protocol.
//!
//! The upstream response is a chunked byte stream of newline-delimited
//! frames. Lines prefixed `data: ` carry a JSON payload; the literal frame
//! `data: [DONE]` marks normal end of stream. Chunk boundaries fall
//! anywhere, including inside a UTF-8 sequence, so bytes are buffered and
//! only cut at newlines.
//!
//! The parser is a small state machine independent of any transport:
//! byte accumulation, frame extraction on newline, then JSON decode with
//! skip-on-error in [`delta_text`].

use super::types::StreamChunk;

/// Frame prefix carrying a payload.
const DATA_PREFIX: &str = "data: ";

/// Terminal sentinel payload.
const DONE_SENTINEL: &str = "[DONE]";

/// One extracted frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
    /// A `data: ` payload, JSON not yet decoded.
    Data(String),
    /// The `data: [DONE]` end-of-stream sentinel.
    Done,
}

/// Line-buffer accumulator turning raw chunks into frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes, returning every frame completed by it.
    ///
    /// Lines without the `data: ` prefix (blank separators, comments) are
    /// dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(frame) = parse_line(&line[..line.len() - 1]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Consume the buffer, parsing a trailing line the stream never
    /// terminated with a newline.
    #[must_use]
    pub fn finish(self) -> Option<Frame> {
        if self.buf.is_empty() {
            None
        } else {
            parse_line(&self.buf)
        }
    }
}

/// Parse a single line (newline already stripped) into a frame.
fn parse_line(line: &[u8]) -> Option<Frame> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches('\r');
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();

    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(Frame::Done);
    }
    Some(Frame::Data(payload.to_string()))
}

/// Extract the incremental text delta from a frame payload.
///
/// Malformed JSON and chunks without content (role announcements, finish
/// markers) yield `None`; neither is fatal to the stream.
#[must_use]
pub fn delta_text(payload: &str) -> Option<String> {
    let chunk: StreamChunk = serde_json::from_str(payload).ok()?;
    chunk
        .choices
        .into_iter()
        .next()?
        .delta
        .content
        .filter(|content| !content.is_empty())
}
