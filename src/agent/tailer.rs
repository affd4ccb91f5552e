//! Per-file tailer.
//!
//! A [`FileTailer`] follows one local log file and turns appended content
//! into [`Frame`]s on the session's output queue:
//!
//! - [`FileTailer::open`] opens the file, seeks to its end (older content is
//!   never shipped) and registers a `notify` watch on the path.
//! - On every change notification the tailer reads everything new and emits
//!   all complete lines as one frame. An unterminated trailing line stays
//!   buffered until its terminator arrives.
//! - When the path disappears or starts pointing at a different file
//!   (rotation), the old handle is drained first, then the path is polled at
//!   a fixed interval until it reappears. The replacement file is read from
//!   its beginning. Exhausting the retry budget ends this tailer with
//!   `AppError::Tail`; other tailers are unaffected.
//! - A file truncated in place is re-read from offset 0.
//! - A buffered partial line is terminated and sent before the tailer
//!   rewinds or switches files. A line that outgrows one wire line is sent
//!   in terminated chunks.

use std::io::SeekFrom;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use file_id::FileId;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RotationPolicy;
use crate::protocol::frame::{Frame, LogStreamId};
use crate::protocol::MAX_LINE_PAYLOAD_BYTES;
use crate::{AppError, Result};

/// Bytes requested from the file per read call.
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Pending complete lines are flushed as a frame once they reach this size,
/// even if more data is still readable.
const MAX_FRAME_PAYLOAD_BYTES: usize = 256 * 1024;

type WatchEvent = std::result::Result<Event, notify::Error>;

/// What to tail and which stream id it was assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailTarget {
    /// Id negotiated for this file.
    pub id: LogStreamId,
    /// Label the file was registered under.
    pub label: String,
    /// Local path.
    pub path: PathBuf,
}

/// Follows one file and emits its appended lines.
pub struct FileTailer {
    target: TailTarget,
    policy: RotationPolicy,
    file: File,
    identity: FileId,
    offset: u64,
    /// Bytes read but not yet emitted (at most one unterminated line once
    /// complete lines have been flushed).
    pending: Vec<u8>,
    watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<WatchEvent>,
}

impl FileTailer {
    /// Open `target.path`, position at end-of-file, and start watching it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Tail` if the file cannot be opened or seeked, or if
    /// the watch cannot be registered. Callers treat this as fatal to the
    /// agent session.
    pub async fn open(target: TailTarget, policy: RotationPolicy) -> Result<Self> {
        let (mut file, identity) = open_with_identity(&target.path).await?;
        let offset = file.seek(SeekFrom::End(0)).await.map_err(|e| {
            AppError::Tail(format!("failed to seek {}: {e}", target.path.display()))
        })?;

        let (event_tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: WatchEvent| {
            // The receiver is gone once the tailer stops; nothing to report.
            let _ = event_tx.send(event);
        })
        .map_err(|e| AppError::Tail(format!("failed to create watcher: {e}")))?;
        watch_path(&mut watcher, &target.path)?;

        debug!(file = %target.path.display(), offset, "watching file");

        Ok(Self {
            target,
            policy,
            file,
            identity,
            offset,
            pending: Vec::new(),
            watcher,
            events,
        })
    }

    /// Stream id this tailer emits frames for.
    #[must_use]
    pub fn id(&self) -> LogStreamId {
        self.target.id
    }

    /// Label this tailer was registered under.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.target.label
    }

    /// Tail until cancelled, the output queue closes, or the watch ends.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Tail` when the file cannot be read or a rotated
    /// file does not reappear within the retry budget.
    pub async fn run(mut self, out: mpsc::Sender<Frame>, cancel: CancellationToken) -> Result<()> {
        // Pick up anything appended between open and the first event.
        if self.drain(&out).await?.is_break() {
            return Ok(());
        }

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!(file = %self.target.path.display(), "tailer: cancellation received, stopping");
                    return Ok(());
                }

                event = self.events.recv() => {
                    let flow = match event {
                        None => {
                            warn!(file = %self.target.path.display(), "tailer: watch channel closed, stopping");
                            return Ok(());
                        }
                        Some(Err(err)) => {
                            warn!(file = %self.target.path.display(), error = %err, "tailer: watch error");
                            continue;
                        }
                        Some(Ok(event)) => self.on_event(&event, &out, &cancel).await?,
                    };
                    if flow.is_break() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn on_event(
        &mut self,
        event: &Event,
        out: &mpsc::Sender<Frame>,
        cancel: &CancellationToken,
    ) -> Result<ControlFlow<()>> {
        if matches!(event.kind, EventKind::Access(_)) {
            return Ok(ControlFlow::Continue(()));
        }

        debug!(file = %self.target.path.display(), kind = ?event.kind, "watched file changed");
        if self.drain(out).await?.is_break() {
            return Ok(ControlFlow::Break(()));
        }

        if self.is_rotated().await {
            return self.reattach(out, cancel).await;
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Read everything appended since the last call and emit complete lines.
    async fn drain(&mut self, out: &mpsc::Sender<Frame>) -> Result<ControlFlow<()>> {
        if self.rewind_if_truncated(out).await?.is_break() {
            return Ok(ControlFlow::Break(()));
        }

        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            let n = self.file.read(&mut chunk).await.map_err(|e| {
                AppError::Tail(format!("failed to read {}: {e}", self.target.path.display()))
            })?;
            if n == 0 {
                break;
            }
            self.offset += n as u64;
            self.pending.extend_from_slice(&chunk[..n]);

            if self.pending.len() >= MAX_FRAME_PAYLOAD_BYTES && self.emit(out).await.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }

        Ok(self.emit(out).await)
    }

    /// Send every complete line in `pending` as one frame.
    ///
    /// An unterminated line that already fills one wire line is cut into
    /// terminated chunks of `MAX_LINE_PAYLOAD_BYTES - 1` bytes, the same
    /// boundaries the frame encoder uses, so `pending` stays bounded.
    async fn emit(&mut self, out: &mpsc::Sender<Frame>) -> ControlFlow<()> {
        if let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') {
            let rest = self.pending.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.pending, rest);
            if self.send(out, complete).await.is_break() {
                return ControlFlow::Break(());
            }
        }

        while self.pending.len() >= MAX_LINE_PAYLOAD_BYTES {
            let rest = self.pending.split_off(MAX_LINE_PAYLOAD_BYTES - 1);
            let mut piece = std::mem::replace(&mut self.pending, rest);
            piece.push(b'\n');
            warn!(
                file = %self.target.path.display(),
                limit = MAX_LINE_PAYLOAD_BYTES,
                "line exceeds frame limit, shipping it in chunks"
            );
            if self.send(out, piece).await.is_break() {
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    /// Terminate and send a buffered partial line whose file is going away,
    /// so it is never glued to the first line of the next file.
    async fn flush_partial(&mut self, out: &mpsc::Sender<Frame>) -> ControlFlow<()> {
        if self.pending.is_empty() {
            return ControlFlow::Continue(());
        }

        let mut line = std::mem::take(&mut self.pending);
        warn!(file = %self.target.path.display(), bytes = line.len(), "closing unterminated line");
        line.push(b'\n');
        self.send(out, line).await
    }

    async fn send(&self, out: &mpsc::Sender<Frame>, payload: Vec<u8>) -> ControlFlow<()> {
        let bytes = payload.len();
        if out.send(Frame::new(self.target.id, payload)).await.is_err() {
            debug!(file = %self.target.path.display(), "tailer: output queue closed, stopping");
            return ControlFlow::Break(());
        }

        debug!(file = %self.target.path.display(), id = %self.target.id, bytes, "new data queued");
        ControlFlow::Continue(())
    }

    async fn rewind_if_truncated(&mut self, out: &mpsc::Sender<Frame>) -> Result<ControlFlow<()>> {
        let len = self
            .file
            .metadata()
            .await
            .map_err(|e| AppError::Tail(format!("failed to stat {}: {e}", self.target.path.display())))?
            .len();

        if len >= self.offset {
            return Ok(ControlFlow::Continue(()));
        }

        info!(file = %self.target.path.display(), previous = self.offset, len, "file truncated, reading from start");
        if self.flush_partial(out).await.is_break() {
            return Ok(ControlFlow::Break(()));
        }
        self.file.seek(SeekFrom::Start(0)).await.map_err(|e| {
            AppError::Tail(format!("failed to seek {}: {e}", self.target.path.display()))
        })?;
        self.offset = 0;
        Ok(ControlFlow::Continue(()))
    }

    /// Whether the watched path no longer names the open file.
    async fn is_rotated(&self) -> bool {
        match file_identity(&self.target.path).await {
            Ok(current) => current != self.identity,
            Err(_) => true,
        }
    }

    /// Wait for the rotated path to reappear, then follow the new file.
    async fn reattach(
        &mut self,
        out: &mpsc::Sender<Frame>,
        cancel: &CancellationToken,
    ) -> Result<ControlFlow<()>> {
        let path = self.target.path.clone();
        info!(file = %path.display(), "watched file disappeared - trying to rewatch");

        if let Err(err) = self.watcher.unwatch(&path) {
            debug!(file = %path.display(), error = %err, "tailer: old watch already gone");
        }
        if self.flush_partial(out).await.is_break() {
            return Ok(ControlFlow::Break(()));
        }

        for attempt in 1..=self.policy.max_attempts {
            match open_with_identity(&path).await {
                Ok((file, identity)) => {
                    self.file = file;
                    self.identity = identity;
                    self.offset = 0;
                    watch_path(&mut self.watcher, &path)?;
                    info!(file = %path.display(), attempt, "rotated file reopened");
                    return self.drain(out).await;
                }
                Err(err) => {
                    debug!(file = %path.display(), attempt, error = %err, "rotated file not back yet");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(ControlFlow::Break(())),
                () = tokio::time::sleep(self.policy.interval) => {}
            }
        }

        Err(AppError::Tail(format!(
            "{} retries exceeded waiting for {} to reappear",
            self.policy.max_attempts,
            path.display()
        )))
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

async fn open_with_identity(path: &Path) -> Result<(File, FileId)> {
    let file = File::open(path)
        .await
        .map_err(|e| AppError::Tail(format!("failed to open {}: {e}", path.display())))?;
    let identity = file_identity(path).await?;
    Ok((file, identity))
}

/// Look up the file-system identity of `path` off the async workers.
async fn file_identity(path: &Path) -> Result<FileId> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || file_id::get_file_id(owned))
        .await
        .map_err(|e| AppError::Tail(format!("identity lookup for {} failed: {e}", path.display())))?
        .map_err(|e| AppError::Tail(format!("failed to identify {}: {e}", path.display())))
}

fn watch_path(watcher: &mut RecommendedWatcher, path: &Path) -> Result<()> {
    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| AppError::Tail(format!("failed to watch {}: {e}", path.display())))
}
