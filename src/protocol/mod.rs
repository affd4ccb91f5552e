//! Multiplexed log-streaming wire protocol.
//!
//! A session has two phases on the same byte stream:
//!
//! 1. **Handshake**: newline-terminated `verb:argument` text messages
//!    ([`message::HandshakeMessage`]) that exchange the agent's name and
//!    bind each agent log label to a [`frame::LogStreamId`].
//! 2. **Streaming**: newline-terminated frames `!:<id>:<line>` carrying
//!    raw log bytes ([`frame::Frame`]).
//!
//! Both phases are decoded through buffering [`tokio_util::codec`] decoders,
//! so message boundaries never depend on how the transport splits or joins
//! reads. [`codec::into_frame_transport`] switches a connection from the
//! handshake codec to the frame codec without losing buffered bytes.
//!
//! Submodules:
//! - `message`: handshake message grammar.
//! - `frame`: stream identifiers, frames, and the per-line wire encoding.
//! - `codec`: [`Decoder`](tokio_util::codec::Decoder) /
//!   [`Encoder`](tokio_util::codec::Encoder) implementations for both phases.
//! - `handshake`: agent and collector sides of the negotiation.

pub mod codec;
pub mod frame;
pub mod handshake;
pub mod message;

/// Maximum number of log streams one session can negotiate.
pub const MAX_LOG_STREAMS: usize = 256;

/// Maximum length of one wire line, header and terminator included: 1 MiB.
pub const MAX_FRAME_LINE_BYTES: usize = 1_048_576;

/// Longest header the encoder emits (`!:255:`).
pub const MAX_HEADER_BYTES: usize = 6;

/// Longest payload line, terminator included, that fits one wire line.
///
/// Longer lines are split by the sender into several terminated chunks so
/// the receiver never has to discard one.
pub const MAX_LINE_PAYLOAD_BYTES: usize = MAX_FRAME_LINE_BYTES - MAX_HEADER_BYTES;
