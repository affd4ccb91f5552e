#![forbid(unsafe_code)]

//! `glog`: remote log collector / agent binary.
//!
//! Loads configuration, routes diagnostics to the debug log file, and runs
//! the collector or the agent until it finishes or a shutdown signal
//! arrives.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use glog::config::{GlobalConfig, DEFAULT_CONFIG_PATH};
use glog::endpoint;
use glog::mode::RunMode;
use glog::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "glog", about = "Remote log collector and agent", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the `mode` key of the configuration file.
    #[arg(long, value_enum)]
    mode: Option<RunMode>,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(mode) = args.mode {
        config.mode = mode;
        config.validate()?;
    }

    init_tracing(&config, args.log_format)?;
    info!(mode = config.mode.as_str(), name = %config.name, "glog bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(Arc::new(config)))
}

async fn run(config: Arc<GlobalConfig>) -> Result<()> {
    let endpoint = endpoint::build(config).await?;
    let mode = endpoint.mode();

    let ct = CancellationToken::new();
    let mut handle = tokio::spawn(endpoint.run(ct.clone()));

    let result = tokio::select! {
        joined = &mut handle => joined,
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            handle.await
        }
    };

    let result = result
        .map_err(|err| AppError::Config(format!("{} task failed: {err}", mode.as_str())))
        .and_then(|inner| inner);

    match &result {
        Ok(()) => info!(mode = mode.as_str(), "glog shut down"),
        Err(err) => error!(mode = mode.as_str(), %err, "glog exited with error"),
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

/// Route diagnostics to `<logdir>/<debuglog>`, appending.
///
/// `RUST_LOG` wins over the configured level.
fn init_tracing(config: &GlobalConfig, log_format: LogFormat) -> Result<()> {
    fs::create_dir_all(&config.logdir).map_err(|err| {
        AppError::Config(format!(
            "cannot create log directory {}: {err}",
            config.logdir.display()
        ))
    })?;

    let path = config.debuglog_path();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| AppError::Config(format!("cannot open {}: {err}", path.display())))?;

    let default_level = if config.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(Arc::new(file));

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
