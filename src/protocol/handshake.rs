//! Session handshake: identity exchange and stream id negotiation.
//!
//! The agent drives the exchange; the collector answers:
//!
//! 1. **`new-client:<name>`** → **`confirm-client:<name>`**
//! 2. For every configured file, **`new-log:<label>`** →
//!    **`new-log-id:<id>`**, ids assigned sequentially from 0.
//! 3. **`confirmed-client:<name>`** → **`ok-client:<name>`**
//!
//! The collector tells another registration apart from the end of
//! registration by the verb of the next message. Any unexpected verb or
//! echoed name fails the session with `AppError::Handshake`; neither side
//! streams data before the exchange completes.
//!
//! Both functions are generic over the transport so they run unchanged on
//! TCP streams and in-memory duplex pipes.

use std::collections::BTreeMap;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::path_safety::validate_component;
use crate::protocol::codec::HandshakeCodec;
use crate::protocol::frame::LogStreamId;
use crate::protocol::message::HandshakeMessage;
use crate::protocol::MAX_LOG_STREAMS;
use crate::{AppError, Result};

/// Outcome of a successful handshake on the collector side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedSession {
    /// Name the agent announced.
    pub agent_name: String,
    /// Negotiated id → log label bindings.
    pub streams: BTreeMap<LogStreamId, String>,
}

/// Run the agent side of the handshake.
///
/// Registers `labels` in order and returns the label → id mapping the
/// collector assigned.
///
/// # Errors
///
/// - `AppError::Handshake`: the collector answered with an unexpected verb
///   or name, assigned a duplicate id, or closed the connection early.
/// - `AppError::Transport` / `AppError::Io`: the stream failed.
pub async fn client_handshake<T>(
    framed: &mut Framed<T, HandshakeCodec>,
    name: &str,
    labels: &[String],
) -> Result<BTreeMap<String, LogStreamId>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    if name.is_empty() {
        return Err(AppError::Handshake("agent name must not be empty".into()));
    }

    send(framed, HandshakeMessage::NewClient(name.to_owned())).await?;
    match recv(framed).await? {
        HandshakeMessage::ConfirmClient(echo) if echo == name => {}
        other => return Err(unexpected("confirm-client", name, &other)),
    }
    debug!(client = name, "handshake: connection confirmed by collector");

    let mut assigned: BTreeMap<String, LogStreamId> = BTreeMap::new();
    for label in labels {
        send(framed, HandshakeMessage::NewLog(label.clone())).await?;
        let id = match recv(framed).await? {
            HandshakeMessage::NewLogId(id) => id,
            other => return Err(unexpected("new-log-id", name, &other)),
        };
        if assigned.values().any(|existing| *existing == id) {
            return Err(AppError::Handshake(format!(
                "collector assigned id {id} twice"
            )));
        }
        debug!(client = name, label = %label, id = %id, "handshake: log registered");
        assigned.insert(label.clone(), id);
    }

    send(framed, HandshakeMessage::ConfirmedClient(name.to_owned())).await?;
    match recv(framed).await? {
        HandshakeMessage::OkClient(echo) if echo == name => {}
        other => return Err(unexpected("ok-client", name, &other)),
    }
    debug!(client = name, streams = assigned.len(), "handshake: settled");

    Ok(assigned)
}

/// Run the collector side of the handshake.
///
/// # Errors
///
/// - `AppError::Handshake`: the agent sent an unexpected verb, a mismatched
///   name, a duplicate label, or more than [`MAX_LOG_STREAMS`] registrations.
/// - `AppError::PathViolation`: the agent name or a label is not a plain
///   file name.
/// - `AppError::Transport` / `AppError::Io`: the stream failed.
pub async fn accept_handshake<T>(framed: &mut Framed<T, HandshakeCodec>) -> Result<NegotiatedSession>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let agent_name = match recv(framed).await? {
        HandshakeMessage::NewClient(name) => name,
        other => {
            return Err(AppError::Handshake(format!(
                "new client connection request malformed: got '{}'",
                other.verb()
            )))
        }
    };
    validate_component("agent name", &agent_name)?;
    debug!(client = %agent_name, "handshake: new connection request");

    send(framed, HandshakeMessage::ConfirmClient(agent_name.clone())).await?;

    let mut streams: BTreeMap<LogStreamId, String> = BTreeMap::new();
    loop {
        match recv(framed).await? {
            HandshakeMessage::NewLog(label) => {
                validate_component("log label", &label)?;
                if streams.values().any(|existing| *existing == label) {
                    return Err(AppError::Handshake(format!(
                        "log label '{label}' registered twice"
                    )));
                }
                let id = LogStreamId::from_index(streams.len()).ok_or_else(|| {
                    AppError::Handshake(format!(
                        "more than {MAX_LOG_STREAMS} log registrations"
                    ))
                })?;
                send(framed, HandshakeMessage::NewLogId(id)).await?;
                debug!(client = %agent_name, label = %label, id = %id, "handshake: log id assigned");
                streams.insert(id, label);
            }
            HandshakeMessage::ConfirmedClient(name) if name == agent_name => break,
            other => return Err(unexpected("confirmed-client", &agent_name, &other)),
        }
    }

    send(framed, HandshakeMessage::OkClient(agent_name.clone())).await?;
    debug!(client = %agent_name, streams = ?streams, "handshake: logs map assigned");

    Ok(NegotiatedSession {
        agent_name,
        streams,
    })
}

// ── Private helpers ───────────────────────────────────────────────────────────

async fn send<T>(framed: &mut Framed<T, HandshakeCodec>, msg: HandshakeMessage) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(msg).await
}

async fn recv<T>(framed: &mut Framed<T, HandshakeCodec>) -> Result<HandshakeMessage>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(item) => item,
        None => Err(AppError::Handshake(
            "peer closed the connection during handshake".into(),
        )),
    }
}

/// Build the error for a reply that does not match `expected_verb:<name>`.
fn unexpected(expected_verb: &str, name: &str, got: &HandshakeMessage) -> AppError {
    AppError::Handshake(format!(
        "expected '{expected_verb}' for '{name}', got '{got}'"
    ))
}
