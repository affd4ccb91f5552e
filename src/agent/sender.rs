//! Agent sender task.
//!
//! The only task that writes to the transport. It drains the tailers'
//! shared output queue in FIFO order and writes each [`Frame`] through the
//! frame codec, while watching the inbound half of the connection so an
//! orderly close by the collector ends the session.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::codec::DecodedFrame;
use crate::protocol::frame::Frame;
use crate::{AppError, Result};

/// Why the sender stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderExit {
    /// Shutdown was requested.
    Cancelled,
    /// The collector closed the connection.
    PeerClosed,
    /// Every tailer stopped; nothing more can be sent.
    QueueDrained,
}

/// Forwards queued frames to the collector.
///
/// The task exits cleanly when:
/// - `cancel` is triggered (the queue is closed to new items first),
/// - the collector closes its side of the connection, or
/// - every producer of `frames` has been dropped.
///
/// # Errors
///
/// Returns `AppError::Transport` if a write fails or the inbound half of
/// the connection reports an I/O error.
pub async fn run_sender<S, R>(
    client: &str,
    mut sink: S,
    mut peer: R,
    mut frames: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) -> Result<SenderExit>
where
    S: Sink<Frame, Error = AppError> + Unpin,
    R: Stream<Item = Result<DecodedFrame>> + Unpin,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(client, "sender: cancellation received, stopping");
                frames.close();
                return Ok(SenderExit::Cancelled);
            }

            inbound = peer.next() => {
                match inbound {
                    None => {
                        debug!(client, "sender: collector closed the connection");
                        return Ok(SenderExit::PeerClosed);
                    }
                    Some(Ok(Ok(frame))) => {
                        warn!(client, id = %frame.id, "sender: ignoring unexpected data from collector");
                    }
                    Some(Ok(Err(err))) => {
                        warn!(client, error = %err, "sender: ignoring malformed data from collector");
                    }
                    Some(Err(err)) => {
                        return Err(AppError::Transport(format!("connection read failed: {err}")));
                    }
                }
            }

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    debug!(client, "sender: output queue drained, stopping");
                    return Ok(SenderExit::QueueDrained);
                };

                let id = frame.id;
                let bytes = frame.payload.len();
                sink.send(frame).await.map_err(|e| {
                    warn!(client, error = %e, "sender: write to collector failed");
                    AppError::Transport(format!("write failed: {e}"))
                })?;
                debug!(client, id = %id, bytes, "log sent");
            }
        }
    }
}
