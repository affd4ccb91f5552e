//! Demultiplexing frames into an agent's workspace directory.
//!
//! Each agent gets `<logdir>/<agent-name>/`; each negotiated stream writes
//! to `<logdir>/<agent-name>/<label>`. Files are opened lazily in append
//! mode and kept open for the life of the session. Nothing is ever
//! truncated, and bytes for one stream are written in arrival order.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::path_safety::join_component;
use crate::protocol::frame::{Frame, LogStreamId};
use crate::protocol::handshake::NegotiatedSession;
use crate::{AppError, Result};

/// Collector-side bindings and open handles for one session.
#[derive(Debug)]
pub struct AgentWorkspace {
    agent: String,
    dir: PathBuf,
    bindings: BTreeMap<LogStreamId, PathBuf>,
    open: HashMap<LogStreamId, File>,
}

impl AgentWorkspace {
    /// Resolve destination paths and create the agent directory if needed.
    ///
    /// # Errors
    ///
    /// - `AppError::PathViolation` if the agent name or a label is not a
    ///   plain file name.
    /// - `AppError::Persist` if the directory cannot be created.
    pub async fn prepare(logdir: &Path, session: &NegotiatedSession) -> Result<Self> {
        let dir = join_component(logdir, "agent name", &session.agent_name)?;
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::Persist(format!(
                "failed to create log directory {} for client {}: {e}",
                dir.display(),
                session.agent_name
            ))
        })?;

        let mut bindings = BTreeMap::new();
        for (id, label) in &session.streams {
            bindings.insert(*id, join_component(&dir, "log label", label)?);
        }

        Ok(Self {
            agent: session.agent_name.clone(),
            dir,
            bindings,
            open: HashMap::new(),
        })
    }

    /// Agent directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Destination file for `id`, if it was negotiated.
    #[must_use]
    pub fn destination(&self, id: LogStreamId) -> Option<&Path> {
        self.bindings.get(&id).map(PathBuf::as_path)
    }

    /// Append `frame.payload` to the file bound to `frame.id`.
    ///
    /// # Errors
    ///
    /// - `AppError::Frame` if the id was not negotiated in this session;
    ///   nothing is written.
    /// - `AppError::Persist` if the destination cannot be opened or written.
    pub async fn append(&mut self, frame: &Frame) -> Result<()> {
        let path = self.bindings.get(&frame.id).ok_or_else(|| {
            AppError::Frame(format!(
                "stream id {} was not negotiated by client {}",
                frame.id, self.agent
            ))
        })?;

        if frame.payload.is_empty() {
            return Ok(());
        }

        let file = match self.open.entry(frame.id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| {
                        AppError::Persist(format!("error opening log file {}: {e}", path.display()))
                    })?;
                entry.insert(file)
            }
        };

        file.write_all(&frame.payload).await.map_err(|e| {
            AppError::Persist(format!("error writing log file {}: {e}", path.display()))
        })?;
        file.flush().await.map_err(|e| {
            AppError::Persist(format!("error writing log file {}: {e}", path.display()))
        })?;

        debug!(file = %path.display(), bytes = frame.payload.len(), "file updated");
        Ok(())
    }

    /// Sync and close every open destination file.
    ///
    /// # Errors
    ///
    /// Returns the first `AppError::Persist` encountered; the remaining
    /// handles are still closed.
    pub async fn close(mut self) -> Result<()> {
        let mut first_error = None;
        for (id, file) in self.open.drain() {
            if let Err(e) = file.sync_all().await {
                warn!(client = %self.agent, id = %id, error = %e, "error closing log file");
                first_error.get_or_insert_with(|| {
                    AppError::Persist(format!("error closing log file for stream {id}: {e}"))
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
