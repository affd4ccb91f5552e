//! Buffering codecs for both protocol phases.
//!
//! [`HandshakeCodec`] wraps [`tokio_util::codec::LinesCodec`] and parses each
//! line into a [`HandshakeMessage`]. [`FrameCodec`] scans raw bytes for
//! `\n` (payloads need not be UTF-8) and parses each line into a [`Frame`].
//!
//! Both codecs cap the size of a single line so a peer that never sends a
//! terminator cannot make the receiver buffer without bound.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::Framed;
//! use glog::protocol::codec::{into_frame_transport, HandshakeCodec};
//!
//! let mut framed = Framed::new(stream, HandshakeCodec::new());
//! // ... run the handshake ...
//! let frames = into_frame_transport(framed);
//! ```

use std::cmp;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, Framed, FramedParts, LinesCodec, LinesCodecError};

use crate::protocol::frame::{
    encode_frame, parse_frame_line, Frame, LogStreamId, FIELD_DELIMITER, FRAME_MARKER,
};
use crate::protocol::message::HandshakeMessage;
use crate::protocol::MAX_FRAME_LINE_BYTES;
use crate::{AppError, Result};

/// Maximum handshake line length: 4 KiB.
pub const MAX_HANDSHAKE_LINE_BYTES: usize = 4096;


/// Line codec for the `verb:argument` handshake messages.
#[derive(Debug)]
pub struct HandshakeCodec(LinesCodec);

impl HandshakeCodec {
    /// Create a codec with the default [`MAX_HANDSHAKE_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_HANDSHAKE_LINE_BYTES))
    }
}

impl Default for HandshakeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for HandshakeCodec {
    type Item = HandshakeMessage;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.0.decode(src).map_err(map_lines_error)? {
            Some(line) => HandshakeMessage::parse(&line).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.0.decode_eof(src).map_err(map_lines_error)? {
            Some(line) => HandshakeMessage::parse(&line).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<HandshakeMessage> for HandshakeCodec {
    type Error = AppError;

    fn encode(&mut self, item: HandshakeMessage, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item.to_string(), dst).map_err(map_lines_error)
    }
}

/// Outcome of decoding one wire line.
///
/// A malformed line is reported as an item rather than as a decoder error:
/// `Framed` pauses its stream after a decoder error, which a receive loop
/// would mistake for end of stream.
pub type DecodedFrame = Result<Frame>;

/// Byte-oriented codec for steady-state frames.
///
/// Decoding yields one [`DecodedFrame`] per wire line, so a burst of
/// coalesced frames is split on every header. A line without a header that
/// follows a valid frame continues that frame's stream; at the start of the
/// stream, or after a malformed header, such a line is an error. Malformed
/// lines and lines longer than the configured limit yield
/// `Err(AppError::Frame)` items; over-long lines are discarded up to their
/// terminator. The decoder itself only fails on I/O errors.
#[derive(Debug)]
pub struct FrameCodec {
    max_length: usize,
    /// Bytes of the current buffer already scanned for `\n`.
    next_index: usize,
    is_discarding: bool,
    /// Stream of the last well-formed header, for header-less lines.
    current: Option<LogStreamId>,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_FRAME_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            is_discarding: false,
            current: None,
        }
    }

    fn parse_line(&mut self, line: Bytes) -> DecodedFrame {
        if line.starts_with(&[FRAME_MARKER, FIELD_DELIMITER]) {
            let parsed = parse_frame_line(line);
            self.current = parsed.as_ref().ok().map(|frame| frame.id);
            return parsed;
        }

        match self.current {
            Some(id) => Ok(Frame::new(id, line)),
            None => parse_frame_line(line),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = DecodedFrame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DecodedFrame>> {
        loop {
            let read_to = cmp::min(self.max_length.saturating_add(1), src.len());
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.is_discarding, newline) {
                (true, Some(offset)) => {
                    src.advance(self.next_index + offset + 1);
                    self.is_discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset + 1;
                    self.next_index = 0;
                    let line = src.split_to(end).freeze();
                    return Ok(Some(self.parse_line(line)));
                }
                (false, None) if src.len() > self.max_length => {
                    self.is_discarding = true;
                    self.next_index = 0;
                    self.current = None;
                    return Ok(Some(Err(AppError::Frame(format!(
                        "frame line too long: exceeded {} bytes",
                        self.max_length
                    )))));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    /// At end of stream an unterminated trailing line is still delivered:
    /// its bytes are everything the peer managed to send.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<DecodedFrame>> {
        if let Some(decoded) = self.decode(src)? {
            return Ok(Some(decoded));
        }

        self.next_index = 0;
        if self.is_discarding {
            self.is_discarding = false;
            src.clear();
            return Ok(None);
        }

        if src.is_empty() {
            return Ok(None);
        }

        let line = src.split().freeze();
        Ok(Some(self.parse_line(line)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&item, dst)
    }
}

/// Switch a connection from the handshake phase to the frame phase.
///
/// Bytes the peer already sent after its last handshake message stay in
/// the read buffer and are decoded as frames.
pub fn into_frame_transport<T>(framed: Framed<T, HandshakeCodec>) -> Framed<T, FrameCodec> {
    let parts = framed.into_parts();
    let mut next = FramedParts::new::<Frame>(parts.io, FrameCodec::new());
    next.read_buf = parts.read_buf;
    next.write_buf = parts.write_buf;
    Framed::from_parts(next)
}

// ── Private helper ────────────────────────────────────────────────────────────

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_lines_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => AppError::Handshake(format!(
            "handshake line too long: exceeded {MAX_HANDSHAKE_LINE_BYTES} bytes"
        )),
        LinesCodecError::Io(io_err) => AppError::Transport(io_err.to_string()),
    }
}
