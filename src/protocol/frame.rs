//! Stream identifiers and the steady-state frame format.
//!
//! On the wire every payload line is prefixed with the frame header:
//!
//! ```text
//! !:<id>:<line bytes>\n
//! ```
//!
//! A [`Frame`] may carry several lines (one tailer read); it is encoded as
//! one header per line, so a receiver that reads a burst of coalesced
//! frames splits them back on each `!:<id>:` header. Payload bytes after
//! the header are passed through untouched and need not be UTF-8.
//!
//! Peers that send one header followed by several lines (`!:0:a\nb\n`) are
//! understood too: the frame decoder attributes header-less lines to the
//! stream of the preceding frame.
//!
//! A payload line longer than [`MAX_LINE_PAYLOAD_BYTES`] is split into
//! chunks of `MAX_LINE_PAYLOAD_BYTES - 1` bytes, each terminated with `\n`,
//! so no wire line exceeds [`MAX_FRAME_LINE_BYTES`](crate::protocol::MAX_FRAME_LINE_BYTES).
//!
//! The earlier, non-multiplexed format `<label>:<payload>` is recognised by
//! [`parse_frame_line`] and rejected with a dedicated message.

use std::fmt::{Display, Formatter};

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::MAX_LINE_PAYLOAD_BYTES;
use crate::{AppError, Result};

/// First byte of every frame header.
pub const FRAME_MARKER: u8 = b'!';

/// Separator between header fields.
pub const FIELD_DELIMITER: u8 = b':';

/// Per-session identifier bound to one agent log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogStreamId(u8);

impl LogStreamId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Identifier for the `index`-th registration, if it fits in a byte.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index).ok().map(Self)
    }

    /// Parse the decimal text form used on the wire.
    ///
    /// Only ASCII digits are accepted: no sign, no whitespace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Frame` if `raw` is empty, not decimal, or above 255.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
            return Err(AppError::Frame(format!(
                "invalid stream id '{}'",
                String::from_utf8_lossy(raw)
            )));
        }

        // All-digit input is valid UTF-8.
        let text = std::str::from_utf8(raw)
            .map_err(|e| AppError::Frame(format!("invalid stream id: {e}")))?;
        text.parse::<u8>()
            .map(Self)
            .map_err(|_| AppError::Frame(format!("stream id {text} out of range 0-255")))
    }
}

impl Display for LogStreamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of log data bound to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream the payload belongs to.
    pub id: LogStreamId,
    /// Raw log bytes, one or more complete lines.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame from any byte container.
    pub fn new(id: LogStreamId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// Append the wire encoding of `frame` to `dst`.
///
/// An empty payload encodes to nothing. Lines longer than
/// [`MAX_LINE_PAYLOAD_BYTES`] are split into several terminated chunks.
///
/// # Errors
///
/// Returns `AppError::Frame` if the payload does not end with `\n`; the
/// receiver could not tell where such a frame ends.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.is_empty() {
        return Ok(());
    }

    if frame.payload.last() != Some(&b'\n') {
        return Err(AppError::Frame(format!(
            "payload for stream {} does not end with a line terminator",
            frame.id
        )));
    }

    let header = format!("!:{}:", frame.id);
    for line in frame.payload.split_inclusive(|b| *b == b'\n') {
        let mut rest = line;
        while rest.len() > MAX_LINE_PAYLOAD_BYTES {
            let (chunk, tail) = rest.split_at(MAX_LINE_PAYLOAD_BYTES - 1);
            dst.reserve(header.len() + MAX_LINE_PAYLOAD_BYTES);
            dst.put_slice(header.as_bytes());
            dst.put_slice(chunk);
            dst.put_u8(b'\n');
            rest = tail;
        }
        dst.reserve(header.len() + rest.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(rest);
    }

    Ok(())
}

/// Parse one wire line (including its trailing `\n`, if any) into a frame.
///
/// # Errors
///
/// Returns `AppError::Frame` when:
/// - the line lacks the `!:` marker (legacy `<label>:` lines are named as such),
/// - the id field is not terminated by `:`,
/// - the id is not a decimal integer in 0–255.
pub fn parse_frame_line(line: Bytes) -> Result<Frame> {
    if line.len() < 2 || line[0] != FRAME_MARKER || line[1] != FIELD_DELIMITER {
        return Err(unmarked_line_error(&line));
    }

    let id_end = line[2..]
        .iter()
        .position(|b| *b == FIELD_DELIMITER)
        .map(|offset| offset + 2)
        .ok_or_else(|| AppError::Frame("frame header has no id delimiter".into()))?;

    let id = LogStreamId::parse(&line[2..id_end])?;
    Ok(Frame {
        id,
        payload: line.slice(id_end + 1..),
    })
}

/// Describe a line that is missing the frame marker.
fn unmarked_line_error(line: &[u8]) -> AppError {
    let label = line
        .iter()
        .position(|b| *b == FIELD_DELIMITER)
        .filter(|pos| *pos > 0)
        .and_then(|pos| std::str::from_utf8(&line[..pos]).ok())
        .filter(|label| !label.contains(char::is_whitespace));

    match label {
        Some(label) => AppError::Frame(format!(
            "legacy unmultiplexed frame for label '{label}' is not supported"
        )),
        None => AppError::Frame("frame marker missing".into()),
    }
}
