//! Per-connection session handling on the collector.
//!
//! Every accepted connection runs [`serve_session`] in its own task:
//! handshake (bounded by the handshake timeout), workspace preparation,
//! then a receive loop that hands each decoded frame to the
//! [`AgentWorkspace`]. Malformed frames and frames for ids the agent never
//! negotiated are logged and skipped. Handshake violations, transport
//! errors and destination I/O errors end this session only.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::collector::persister::AgentWorkspace;
use crate::protocol::codec::{into_frame_transport, HandshakeCodec};
use crate::protocol::handshake::accept_handshake;
use crate::session::{Lifecycle, SessionState};
use crate::{AppError, Result};

/// Collector settings every connection needs.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Base directory holding one sub-directory per agent.
    pub logdir: PathBuf,
    /// Upper bound for a peer to finish the handshake.
    pub handshake_timeout: Duration,
}

/// Task body for one accepted connection. Never panics or propagates; the
/// outcome is logged inside the session span.
pub async fn handle_connection<T>(
    io: T,
    peer: SocketAddr,
    settings: CollectorSettings,
    cancel: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let span = info_span!(
        "agent_session",
        session_id = %Uuid::new_v4(),
        %peer,
        client = tracing::field::Empty,
    );
    async move {
        let lifecycle = Lifecycle::handshaking();
        match serve_session(io, &settings, &lifecycle, &cancel).await {
            Ok(()) => info!("session closed"),
            Err(err) => error!(%err, "session terminated"),
        }
    }
    .instrument(span)
    .await;
}

/// Run one collector session over any byte stream.
///
/// Returns `Ok(())` when the agent disconnects cleanly or `cancel` fires.
/// `lifecycle` ends in [`SessionState::Closed`] whatever the outcome.
///
/// # Errors
///
/// - `AppError::Handshake` / `AppError::PathViolation`: bad handshake.
/// - `AppError::Persist`: the agent's destination files cannot be written.
/// - `AppError::Transport` / `AppError::Io`: the connection failed.
pub async fn serve_session<T>(
    io: T,
    settings: &CollectorSettings,
    lifecycle: &Lifecycle,
    cancel: &CancellationToken,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let result = stream_session(io, settings, lifecycle, cancel).await;
    lifecycle.close();
    result
}

async fn stream_session<T>(
    io: T,
    settings: &CollectorSettings,
    lifecycle: &Lifecycle,
    cancel: &CancellationToken,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, HandshakeCodec::new());
    let timeout = settings.handshake_timeout;
    let negotiated = tokio::select! {
        () = cancel.cancelled() => return Ok(()),
        negotiated = tokio::time::timeout(timeout, accept_handshake(&mut framed)) => {
            negotiated.map_err(|_| {
                AppError::Handshake(format!("handshake not completed within {timeout:?}"))
            })??
        }
    };
    Span::current().record("client", negotiated.agent_name.as_str());

    let mut workspace = AgentWorkspace::prepare(&settings.logdir, &negotiated).await?;
    lifecycle.advance(SessionState::Streaming);
    info!(
        dir = %workspace.dir().display(),
        streams = negotiated.streams.len(),
        "client connected"
    );

    let mut frames = into_frame_transport(framed);
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("collector session: cancellation received, stopping");
                break;
            }

            item = frames.next() => {
                match item {
                    None => {
                        info!("client disconnected");
                        break;
                    }
                    Some(Ok(Ok(frame))) => match workspace.append(&frame).await {
                        Ok(()) => {}
                        Err(err) if err.is_recoverable() => {
                            warn!(%err, id = %frame.id, "rejected frame from client");
                        }
                        Err(err) => return Err(err),
                    },
                    Some(Ok(Err(err))) => {
                        warn!(%err, "received malformed data from client");
                    }
                    Some(Err(err)) => {
                        return Err(AppError::Transport(format!("connection read failed: {err}")));
                    }
                }
            }
        }
    }

    lifecycle.advance(SessionState::Closing);
    workspace.close().await
}
