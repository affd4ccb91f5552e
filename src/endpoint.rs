//! Role-agnostic endpoint abstraction.
//!
//! The binary only needs "something that runs until cancelled"; which side
//! of the protocol that is depends on [`RunMode`]. [`build`] makes the
//! choice once so the startup path stays free of mode branches.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::collector::Collector;
use crate::config::GlobalConfig;
use crate::mode::RunMode;
use crate::Result;

/// A runnable collector or agent.
pub trait Endpoint: Send {
    /// Which role this endpoint plays.
    fn mode(&self) -> RunMode;

    /// Run until `cancel` fires or the endpoint finishes on its own.
    ///
    /// # Errors
    ///
    /// Returns the endpoint's fatal error; session-scoped collector errors
    /// never surface here.
    fn run(
        self: Box<Self>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

impl Endpoint for Collector {
    fn mode(&self) -> RunMode {
        RunMode::Server
    }

    fn run(
        self: Box<Self>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin((*self).run(cancel))
    }
}

impl Endpoint for Agent {
    fn mode(&self) -> RunMode {
        RunMode::Client
    }

    fn run(
        self: Box<Self>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin((*self).run(cancel))
    }
}

/// Build the endpoint selected by `config.mode`.
///
/// The collector binds its listener here so address errors are reported
/// before the process reports itself as started.
///
/// # Errors
///
/// Returns `AppError::Transport` or `AppError::Persist` if the collector
/// cannot bind or create its log directory.
pub async fn build(config: Arc<GlobalConfig>) -> Result<Box<dyn Endpoint>> {
    match config.mode {
        RunMode::Server => Ok(Box::new(Collector::bind(&config).await?)),
        RunMode::Client => Ok(Box::new(Agent::new(config))),
    }
}
