//! Agent endpoint: tails local files and streams them to a collector.
//!
//! One [`Agent`] supervises exactly one session:
//!
//! 1. **Connecting**: dial `addr` within `connect_timeout_seconds`.
//! 2. **Handshaking**: register every configured label and learn its id.
//! 3. **Streaming**: one [`tailer::FileTailer`] task per file feeds a
//!    bounded queue; [`sender::run_sender`] is the single writer.
//! 4. **Closing / Closed**: stop the tailers, shut the transport down.
//!
//! A dropped session is not resumed; the process exits and a supervisor
//! (systemd, etc.) is expected to restart it.

pub mod sender;
pub mod tailer;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::agent::sender::{run_sender, SenderExit};
use crate::agent::tailer::{FileTailer, TailTarget};
use crate::config::GlobalConfig;
use crate::protocol::codec::{into_frame_transport, HandshakeCodec};
use crate::protocol::handshake::client_handshake;
use crate::session::{Lifecycle, SessionState};
use crate::{AppError, Result};

/// Agent session supervisor.
pub struct Agent {
    config: Arc<GlobalConfig>,
    lifecycle: Lifecycle,
}

impl Agent {
    /// Create an agent for `config`. Nothing is opened until [`Agent::run`].
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::connecting(),
        }
    }

    /// Observe the session state, e.g. to wait until streaming starts.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.lifecycle.subscribe()
    }

    /// Run one session to completion.
    ///
    /// Returns `Ok(())` on cancellation, orderly collector disconnect, or
    /// once every tailer has stopped.
    ///
    /// # Errors
    ///
    /// - `AppError::Transport`: connect timeout or failure, write failure.
    /// - `AppError::Handshake`: the collector violated the handshake.
    /// - `AppError::Tail`: a configured file could not be opened.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let span = info_span!("agent", client = %self.config.name, addr = %self.config.addr);
        async move {
            let result = self.run_session(&cancel).await;
            self.lifecycle.close();
            match &result {
                Ok(()) => info!("agent session closed"),
                Err(err) => error!(%err, "agent session failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_session(&self, cancel: &CancellationToken) -> Result<()> {
        let config = &self.config;

        let stream = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            stream = connect(config) => stream?,
        };
        self.lifecycle.advance(SessionState::Handshaking);

        let mut framed = Framed::new(stream, HandshakeCodec::new());
        let labels: Vec<String> = config.logfiles.keys().cloned().collect();
        let assigned = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            assigned = client_handshake(&mut framed, &config.name, &labels) => assigned?,
        };
        info!(streams = assigned.len(), "connection with collector established");

        // Open every file before streaming anything: a missing file is a
        // misconfiguration and fails the whole session.
        let mut tailers = Vec::with_capacity(config.logfiles.len());
        for (label, path) in &config.logfiles {
            let id = assigned.get(label).copied().ok_or_else(|| {
                AppError::Handshake(format!("no stream id assigned for '{label}'"))
            })?;
            let target = TailTarget {
                id,
                label: label.clone(),
                path: path.clone(),
            };
            tailers.push(FileTailer::open(target, config.rotation_policy()).await?);
        }

        let (frame_tx, frame_rx) = mpsc::channel(config.queue_capacity);
        let tail_cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        for tailer in tailers {
            let out = frame_tx.clone();
            let ct = tail_cancel.clone();
            let id = tailer.id();
            let label = tailer.label().to_owned();
            tasks.spawn(
                async move {
                    match tailer.run(out, ct).await {
                        Ok(()) => debug!("tailer stopped"),
                        Err(err) => error!(%err, "tailer stopped with error; other files continue"),
                    }
                }
                .instrument(info_span!("tailer", id = %id, label = %label)),
            );
        }
        drop(frame_tx);

        self.lifecycle.advance(SessionState::Streaming);
        info!("client started");

        let (mut sink, peer) = into_frame_transport(framed).split();
        let outcome = run_sender(&config.name, &mut sink, peer, frame_rx, cancel.clone()).await;

        self.lifecycle.advance(SessionState::Closing);
        tail_cancel.cancel();
        if let Err(err) = sink.close().await {
            debug!(%err, "transport shutdown reported an error");
        }
        while tasks.join_next().await.is_some() {}

        match outcome? {
            SenderExit::Cancelled => info!("termination signal received - client shutting down"),
            SenderExit::PeerClosed => info!("collector closed the connection"),
            SenderExit::QueueDrained => warn!("all tailers stopped; ending session"),
        }
        Ok(())
    }
}

/// Dial the collector within the configured connect timeout.
async fn connect(config: &GlobalConfig) -> Result<TcpStream> {
    let timeout = config.connect_timeout();
    let stream = tokio::time::timeout(timeout, TcpStream::connect(&config.addr))
        .await
        .map_err(|_| {
            AppError::Transport(format!(
                "timed out after {timeout:?} connecting to {}",
                config.addr
            ))
        })?
        .map_err(|e| {
            AppError::Transport(format!("failed to connect to collector {}: {e}", config.addr))
        })?;
    debug!(addr = %config.addr, "transport established");
    Ok(stream)
}
