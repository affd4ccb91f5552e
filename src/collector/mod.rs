//! Collector endpoint: accepts agent connections and persists their logs.
//!
//! The accept loop spawns one task per connection
//! ([`connection::handle_connection`]); sessions share nothing but the
//! read-only [`connection::CollectorSettings`], so one agent's failure never
//! affects another. On cancellation the listener stops accepting and
//! every session is asked to close before [`Collector::run`] returns.

pub mod connection;
pub mod persister;

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::connection::{handle_connection, CollectorSettings};
use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// Bound collector, ready to accept connections.
pub struct Collector {
    listener: TcpListener,
    settings: CollectorSettings,
}

impl Collector {
    /// Bind the listener on `config.addr`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the address cannot be bound, or
    /// `AppError::Persist` if `config.logdir` cannot be created.
    pub async fn bind(config: &GlobalConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.logdir).await.map_err(|e| {
            AppError::Persist(format!(
                "failed to create log directory {}: {e}",
                config.logdir.display()
            ))
        })?;

        let listener = TcpListener::bind(&config.addr).await.map_err(|e| {
            AppError::Transport(format!("failed to bind {}: {e}", config.addr))
        })?;

        Ok(Self {
            listener,
            settings: CollectorSettings {
                logdir: config.logdir.clone(),
                handshake_timeout: config.handshake_timeout(),
            },
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the socket address is unavailable.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| AppError::Transport(format!("listener address unavailable: {e}")))
    }

    /// Accept connections until `cancel` fires, then wait for open sessions
    /// to close.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept errors are logged and the
    /// loop continues.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "server started");

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!("termination signal received - server gracefully shutting down");
                    break;
                }

                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "connection accepted");
                            sessions.spawn(handle_connection(
                                stream,
                                peer,
                                self.settings.clone(),
                                cancel.child_token(),
                            ));
                        }
                        Err(err) => {
                            warn!(%err, "accept failed");
                        }
                    }
                }
            }
        }

        drop(self.listener);
        while sessions.join_next().await.is_some() {}
        info!("server stopped");
        Ok(())
    }
}
